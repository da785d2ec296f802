//! Materialised object state.

use crate::delta::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed object as seen at some version.
///
/// Merge resolvers receive and return these; the heap stores them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    pub type_name: String,
    pub oid: String,
    pub dims: BTreeMap<String, Value>,
}

impl ObjectState {
    pub fn new(type_name: impl Into<String>, oid: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            oid: oid.into(),
            dims: BTreeMap::new(),
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: Value) -> Self {
        self.dims.insert(name.into(), value);
        self
    }

    pub fn get_dimension(&self, name: &str) -> Option<&Value> {
        self.dims.get(name)
    }

    pub fn set_dimension(&mut self, name: impl Into<String>, value: Value) {
        self.dims.insert(name.into(), value);
    }

    pub fn remove_dimension(&mut self, name: &str) -> Option<Value> {
        self.dims.remove(name)
    }
}
