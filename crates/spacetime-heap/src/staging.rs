//! Local changes waiting for the next commit.

use spacetime_core::{Delta, Event, ObjectChange, ObjectState, Result, Schema, Value};
use spacetime_delta::{delete_change, object_change};
use std::collections::BTreeSet;
use tracing::trace;

/// Delta accumulated by local writes since the last commit.
#[derive(Clone, Debug, Default)]
pub struct StagedDiff {
    delta: Delta,
    /// Objects deleted and added again since the last commit.
    recreated: BTreeSet<(String, String)>,
}

impl StagedDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    /// Stage a freshly added object: a `New` record with every dimension.
    pub fn add(&mut self, schema: &Schema, object: &ObjectState) {
        if self.is_deleted(&object.type_name, &object.oid) {
            self.recreated
                .insert((object.type_name.clone(), object.oid.clone()));
        }
        if let Some(change) = object_change(schema, None, object) {
            self.delta
                .insert(object.type_name.as_str(), object.oid.as_str(), change);
        }
    }

    pub fn is_deleted(&self, type_name: &str, oid: &str) -> bool {
        self.delta
            .get(type_name, oid)
            .is_some_and(|change| change.is_delete(type_name))
    }

    /// Stage a dimension write. `previous` is the value the write replaces;
    /// custom-diff dimensions stage the strategy's change from it, folded
    /// into whatever was staged for the dimension already.
    ///
    /// Returns `false` when the object is staged for deletion and the write
    /// was dropped.
    pub fn write_dimension(
        &mut self,
        schema: &Schema,
        type_name: &str,
        oid: &str,
        dim: &str,
        previous: Option<&Value>,
        value: Value,
    ) -> Result<bool> {
        if self.is_deleted(type_name, oid) {
            return Ok(false);
        }
        if self.delta.get(type_name, oid).is_none() {
            self.delta.insert(
                type_name,
                oid,
                ObjectChange::new(type_name, Event::Modification),
            );
        }
        let Some(change) = self.delta.get_mut(type_name, oid) else {
            return Ok(false);
        };
        let encoded = match schema.strategy(type_name, dim) {
            Some(strategy) => {
                let step = strategy.diff(previous, &value);
                match change.dims.get(dim) {
                    Some(staged) if change.event(type_name) != Some(Event::New) => {
                        strategy.compose(staged, &step)?
                    }
                    // A staged New already carries the full value.
                    Some(_) => strategy.diff(None, &value),
                    None => step,
                }
            }
            None => value,
        };
        trace!(type_name, oid, dim, "Staged dimension write");
        change.dims.insert(dim.to_string(), encoded);
        Ok(true)
    }

    /// Stage a delete. An object added since the last commit simply
    /// disappears; one that existed at the checked-out version gets a
    /// `Delete` record.
    pub fn delete(&mut self, type_name: &str, oid: &str, in_previous: bool) {
        let staged_new = self
            .delta
            .get(type_name, oid)
            .is_some_and(|change| change.event(type_name) == Some(Event::New));
        let recreated = self
            .recreated
            .remove(&(type_name.to_string(), oid.to_string()));
        self.delta.remove(type_name, oid);
        if recreated || (in_previous && !staged_new) {
            self.delta.insert(type_name, oid, delete_change(type_name));
        }
    }

    /// Hand the staged delta over, leaving nothing staged.
    pub fn take(&mut self) -> Delta {
        self.recreated.clear();
        std::mem::take(&mut self.delta)
    }
}
