//! Three-way transform of two divergent deltas.
//!
//! Given the deltas of two branches leaving a common ancestor, produce the
//! two recovery deltas that lead both branches to the same merge state:
//! - `current_merge` is applied on the current branch and carries what the
//!   conflicting branch changed,
//! - `conf_merge` is applied on the conflicting branch and carries what the
//!   current branch changed.
//!
//! Without a custom resolver the current side wins every dimension both
//! sides touched, and a delete beats a modification.

use crate::resolver::ResolverRegistry;
use crate::state::{apply_change, delete_change, impossible_pair, object_change, State};
use spacetime_core::{
    Delta, DeltaError, Event, ObjectChange, ObjectState, Result, Schema, TypeChanges, Value,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Read access to object state at the common ancestor of a merge.
pub trait AncestorView {
    fn object_at_ancestor(&self, type_name: &str, oid: &str) -> Result<Option<ObjectState>>;
}

impl AncestorView for State {
    fn object_at_ancestor(&self, type_name: &str, oid: &str) -> Result<Option<ObjectState>> {
        Ok(self.object(type_name, oid).cloned())
    }
}

/// The two recovery deltas of a merge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeDeltas {
    pub current_merge: Delta,
    pub conf_merge: Delta,
}

type ObjectMerge = (Option<ObjectChange>, Option<ObjectChange>);

/// Runs the type → object → dimension recursion.
pub struct Transformer<'a> {
    schema: &'a Schema,
    resolvers: &'a ResolverRegistry,
}

impl<'a> Transformer<'a> {
    pub fn new(schema: &'a Schema, resolvers: &'a ResolverRegistry) -> Self {
        Self { schema, resolvers }
    }

    pub fn transform(
        &self,
        ancestor: &dyn AncestorView,
        current: &Delta,
        conflicting: &Delta,
    ) -> Result<MergeDeltas> {
        let mut out = MergeDeltas::default();
        let type_names: BTreeSet<&String> = current.0.keys().chain(conflicting.0.keys()).collect();
        for tp in type_names {
            match (current.0.get(tp), conflicting.0.get(tp)) {
                (Some(cur), Some(conf)) => self.transform_type(ancestor, tp, cur, conf, &mut out)?,
                (Some(cur), None) => {
                    for (oid, change) in cur {
                        out.conf_merge.insert(tp.as_str(), oid.as_str(), change.clone());
                    }
                }
                (None, Some(conf)) => {
                    for (oid, change) in conf {
                        out.current_merge.insert(tp.as_str(), oid.as_str(), change.clone());
                    }
                }
                (None, None) => {}
            }
        }
        out.current_merge.prune_empty();
        out.conf_merge.prune_empty();
        Ok(out)
    }

    fn transform_type(
        &self,
        ancestor: &dyn AncestorView,
        tp: &str,
        current: &TypeChanges,
        conflicting: &TypeChanges,
        out: &mut MergeDeltas,
    ) -> Result<()> {
        let oids: BTreeSet<&String> = current.keys().chain(conflicting.keys()).collect();
        for oid in oids {
            let (to_current, to_conf) = match (current.get(oid), conflicting.get(oid)) {
                (Some(cur), Some(conf)) => self.transform_object(ancestor, tp, oid, cur, conf)?,
                (Some(cur), None) => (None, Some(cur.clone())),
                (None, Some(conf)) => (Some(conf.clone()), None),
                (None, None) => (None, None),
            };
            if let Some(change) = to_current {
                out.current_merge.insert(tp, oid.as_str(), change);
            }
            if let Some(change) = to_conf {
                out.conf_merge.insert(tp, oid.as_str(), change);
            }
        }
        Ok(())
    }

    fn transform_object(
        &self,
        ancestor: &dyn AncestorView,
        tp: &str,
        oid: &str,
        current: &ObjectChange,
        conflicting: &ObjectChange,
    ) -> Result<ObjectMerge> {
        let cur_event = current.event(tp).unwrap_or(Event::Modification);
        let conf_event = conflicting.event(tp).unwrap_or(Event::Modification);
        match (cur_event, conf_event) {
            (Event::New, Event::Modification | Event::Delete)
            | (Event::Modification | Event::Delete, Event::New) => {
                Err(impossible_pair(tp, oid, cur_event, conf_event))
            }
            (Event::Delete, Event::Delete) => Ok((None, None)),
            _ if self.resolvers.get(tp).is_some() => {
                self.resolve_custom(ancestor, tp, oid, current, conflicting, cur_event)
            }
            (Event::New, Event::New) => self.last_writer_wins(tp, current, conflicting, true),
            (Event::Modification, Event::Modification) => {
                self.last_writer_wins(tp, current, conflicting, false)
            }
            (Event::Modification, Event::Delete) => Ok((Some(conflicting.clone()), None)),
            (Event::Delete, Event::Modification) => Ok((None, Some(current.clone()))),
        }
    }

    /// Current side wins overlapping plain dimensions. Custom-diff dimensions
    /// exchange their changes, since incremental changes commute.
    ///
    /// With `full` set, the conflicting branch receives every current
    /// dimension rather than only the differing ones.
    fn last_writer_wins(
        &self,
        tp: &str,
        current: &ObjectChange,
        conflicting: &ObjectChange,
        full: bool,
    ) -> Result<ObjectMerge> {
        let mut to_current: BTreeMap<String, Value> = BTreeMap::new();
        let mut to_conf: BTreeMap<String, Value> = BTreeMap::new();

        for (dim, value) in &conflicting.dims {
            if !current.dims.contains_key(dim) {
                to_current.insert(dim.clone(), value.clone());
            }
        }

        for (dim, value) in &current.dims {
            match self.schema.strategy(tp, dim) {
                Some(strategy) => {
                    to_conf.insert(dim.clone(), value.clone());
                    if let Some(theirs) = conflicting.dims.get(dim) {
                        if !strategy.is_snapshot(value) {
                            let catch_up = if strategy.is_snapshot(theirs) {
                                strategy.compose(theirs, value)?
                            } else {
                                theirs.clone()
                            };
                            to_current.insert(dim.clone(), catch_up);
                        }
                    }
                }
                None => {
                    if full || conflicting.dims.get(dim) != Some(value) {
                        to_conf.insert(dim.clone(), value.clone());
                    }
                }
            }
        }

        Ok((
            recovery_change(tp, &conflicting.types, to_current),
            recovery_change(tp, &current.types, to_conf),
        ))
    }

    fn resolve_custom(
        &self,
        ancestor: &dyn AncestorView,
        tp: &str,
        oid: &str,
        current: &ObjectChange,
        conflicting: &ObjectChange,
        cur_event: Event,
    ) -> Result<ObjectMerge> {
        let Some(resolver) = self.resolvers.get(tp) else {
            return Ok((None, None));
        };
        let original = if cur_event == Event::New {
            None
        } else {
            ancestor.object_at_ancestor(tp, oid)?
        };
        let yours = apply_change(self.schema, tp, oid, original.clone(), current)?;
        let theirs = apply_change(self.schema, tp, oid, original.clone(), conflicting)?;

        let merged = resolver(original.as_ref(), yours.as_ref(), theirs.as_ref()).map_err(|e| {
            DeltaError::Resolver {
                type_name: tp.to_string(),
                message: format!("{} (object {})", e, oid),
            }
        })?;
        debug!(type_name = tp, oid, deleted = merged.is_none(), "custom resolver ran");

        match merged {
            Some(mut target) => {
                target.type_name = tp.to_string();
                target.oid = oid.to_string();
                Ok((
                    object_change(self.schema, yours.as_ref(), &target),
                    object_change(self.schema, theirs.as_ref(), &target),
                ))
            }
            None => Ok((
                yours.map(|_| delete_change(tp)),
                theirs.map(|_| delete_change(tp)),
            )),
        }
    }
}

fn recovery_change(
    tp: &str,
    source_types: &BTreeMap<String, Event>,
    dims: BTreeMap<String, Value>,
) -> Option<ObjectChange> {
    if dims.is_empty() {
        return None;
    }
    let mut change = ObjectChange::new(tp, Event::Modification);
    for other in source_types.keys() {
        change.types.insert(other.clone(), Event::Modification);
    }
    change.dims = dims;
    Some(change)
}
