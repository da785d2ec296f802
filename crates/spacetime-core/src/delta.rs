//! The delta wire model.
//!
//! A delta maps type name → object id → [`ObjectChange`]. Ordered maps keep
//! the encoding of equal deltas byte-for-byte identical on every replica.

use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An encoded dimension value, or an encoded change for custom-diff dimensions.
pub type Value = serde_json::Value;

/// Changes to the objects of a single type, keyed by object id.
pub type TypeChanges = BTreeMap<String, ObjectChange>;

/// The change record of one object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectChange {
    /// Event per declared type the object belongs to.
    pub types: BTreeMap<String, Event>,

    /// New dimension values (or custom-diff changes).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dims: BTreeMap<String, Value>,
}

impl ObjectChange {
    pub fn new(type_name: impl Into<String>, event: Event) -> Self {
        let mut types = BTreeMap::new();
        types.insert(type_name.into(), event);
        Self {
            types,
            dims: BTreeMap::new(),
        }
    }

    pub fn with_dim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.dims.insert(name.into(), value);
        self
    }

    /// Event recorded for `type_name`, if the object is a member of that type.
    pub fn event(&self, type_name: &str) -> Option<Event> {
        self.types.get(type_name).copied()
    }

    pub fn is_delete(&self, type_name: &str) -> bool {
        self.event(type_name) == Some(Event::Delete)
    }

    /// Set the event for every type the change mentions.
    pub fn set_event(&mut self, event: Event) {
        for ev in self.types.values_mut() {
            *ev = event;
        }
    }
}

/// A state difference between two versions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta(pub BTreeMap<String, TypeChanges>);

impl Delta {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// True when no object is touched.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|changes| changes.is_empty())
    }

    pub fn get(&self, type_name: &str, oid: &str) -> Option<&ObjectChange> {
        self.0.get(type_name).and_then(|changes| changes.get(oid))
    }

    pub fn get_mut(&mut self, type_name: &str, oid: &str) -> Option<&mut ObjectChange> {
        self.0.get_mut(type_name).and_then(|changes| changes.get_mut(oid))
    }

    pub fn insert(&mut self, type_name: impl Into<String>, oid: impl Into<String>, change: ObjectChange) {
        self.0
            .entry(type_name.into())
            .or_default()
            .insert(oid.into(), change);
    }

    pub fn remove(&mut self, type_name: &str, oid: &str) -> Option<ObjectChange> {
        let changes = self.0.get_mut(type_name)?;
        let removed = changes.remove(oid);
        if changes.is_empty() {
            self.0.remove(type_name);
        }
        removed
    }

    pub fn types(&self) -> impl Iterator<Item = (&String, &TypeChanges)> {
        self.0.iter()
    }

    /// All `(type, oid, change)` triples in key order.
    pub fn objects(&self) -> impl Iterator<Item = (&str, &str, &ObjectChange)> {
        self.0.iter().flat_map(|(tp, changes)| {
            changes
                .iter()
                .map(move |(oid, change)| (tp.as_str(), oid.as_str(), change))
        })
    }

    /// Number of object changes across all types.
    pub fn len(&self) -> usize {
        self.0.values().map(|changes| changes.len()).sum()
    }

    /// Drop type entries that no longer hold any object change.
    pub fn prune_empty(&mut self) {
        self.0.retain(|_, changes| !changes.is_empty());
    }
}

impl FromIterator<(String, String, ObjectChange)> for Delta {
    fn from_iter<I: IntoIterator<Item = (String, String, ObjectChange)>>(iter: I) -> Self {
        let mut delta = Delta::new();
        for (tp, oid, change) in iter {
            delta.insert(tp, oid, change);
        }
        delta
    }
}
