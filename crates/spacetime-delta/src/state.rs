//! Materialising deltas into object state, and diffing object state back
//! into deltas.

use spacetime_core::{Delta, DeltaError, Event, ObjectChange, ObjectState, Result, Schema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Objects keyed by type name, then object id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(BTreeMap<String, BTreeMap<String, ObjectState>>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, type_name: &str, oid: &str) -> Option<&ObjectState> {
        self.0.get(type_name).and_then(|objects| objects.get(oid))
    }

    pub fn objects(&self, type_name: &str) -> impl Iterator<Item = &ObjectState> {
        self.0.get(type_name).into_iter().flat_map(|objects| objects.values())
    }

    pub fn insert(&mut self, object: ObjectState) {
        self.0
            .entry(object.type_name.clone())
            .or_default()
            .insert(object.oid.clone(), object);
    }

    pub fn remove(&mut self, type_name: &str, oid: &str) -> Option<ObjectState> {
        let objects = self.0.get_mut(type_name)?;
        let removed = objects.remove(oid);
        if objects.is_empty() {
            self.0.remove(type_name);
        }
        removed
    }

    /// Number of live objects across all types.
    pub fn len(&self) -> usize {
        self.0.values().map(|objects| objects.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `delta` on top of this state. Deleted objects are dropped.
    pub fn apply(&mut self, schema: &Schema, delta: &Delta) -> Result<()> {
        for (tp, oid, change) in delta.objects() {
            let base = self.remove(tp, oid);
            if let Some(object) = apply_change(schema, tp, oid, base, change)? {
                self.insert(object);
            }
        }
        Ok(())
    }
}

/// Apply one object change on top of `base`, returning the resulting object
/// or `None` when the change deletes it.
pub fn apply_change(
    schema: &Schema,
    type_name: &str,
    oid: &str,
    base: Option<ObjectState>,
    change: &ObjectChange,
) -> Result<Option<ObjectState>> {
    let mut object = match change.event(type_name).unwrap_or(Event::Modification) {
        Event::Delete => return Ok(None),
        Event::New => ObjectState::new(type_name, oid),
        Event::Modification => base.unwrap_or_else(|| ObjectState::new(type_name, oid)),
    };
    for (dim, value) in &change.dims {
        let resolved = match schema.strategy(type_name, dim) {
            Some(strategy) => strategy.apply(object.get_dimension(dim), value)?,
            None => value.clone(),
        };
        object.set_dimension(dim.clone(), resolved);
    }
    Ok(Some(object))
}

/// Minimal change turning `from` into `to`.
///
/// With no `from` this is a `New` record carrying every dimension. Returns
/// `None` when nothing differs.
pub fn object_change(
    schema: &Schema,
    from: Option<&ObjectState>,
    to: &ObjectState,
) -> Option<ObjectChange> {
    let tp = to.type_name.as_str();
    let Some(from) = from else {
        let mut change = ObjectChange::new(tp, Event::New);
        for (dim, value) in &to.dims {
            let encoded = match schema.strategy(tp, dim) {
                Some(strategy) => strategy.diff(None, value),
                None => value.clone(),
            };
            change.dims.insert(dim.clone(), encoded);
        }
        return Some(change);
    };

    let mut change = ObjectChange::new(tp, Event::Modification);
    for (dim, value) in &to.dims {
        let previous = from.get_dimension(dim);
        if previous == Some(value) {
            continue;
        }
        let encoded = match schema.strategy(tp, dim) {
            Some(strategy) => strategy.diff(previous, value),
            None => value.clone(),
        };
        change.dims.insert(dim.clone(), encoded);
    }
    if change.dims.is_empty() {
        None
    } else {
        Some(change)
    }
}

/// Delete record for an object of `type_name`.
pub fn delete_change(type_name: &str) -> ObjectChange {
    ObjectChange::new(type_name, Event::Delete)
}

pub(crate) fn impossible_pair(tp: &str, oid: &str, current: Event, conflicting: Event) -> DeltaError {
    DeltaError::ImpossibleEventPair {
        type_name: tp.to_string(),
        oid: oid.to_string(),
        current,
        conflicting,
    }
}
