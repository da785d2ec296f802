//! Per-type dimension schema and custom-diff strategies.
//!
//! Plain dimensions travel as full values. Dimensions with a [`DiffStrategy`]
//! travel as encoded incremental changes that must be replayed from the last
//! snapshot to recover a value.

use crate::delta::Value;
use crate::error::{DeltaError, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Encoding of incremental changes for a custom-diff dimension.
pub trait DiffStrategy: Send + Sync + fmt::Debug {
    /// Change that turns `from` into `to`. With no `from` it must be a snapshot.
    fn diff(&self, from: Option<&Value>, to: &Value) -> Value;

    /// Apply a change on top of `base`.
    fn apply(&self, base: Option<&Value>, change: &Value) -> Result<Value>;

    /// Single change equivalent to `older` followed by `newer`.
    fn compose(&self, older: &Value, newer: &Value) -> Result<Value>;

    /// Whether the change carries the full value.
    fn is_snapshot(&self, change: &Value) -> bool;
}

/// Integer counter whose changes are `{"set": n}` or `{"add": d}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterDiff;

impl CounterDiff {
    fn part(change: &Value, key: &str) -> Option<i64> {
        change.get(key).and_then(Value::as_i64)
    }

    fn invalid(change: &Value) -> DeltaError {
        DeltaError::InvalidChange {
            dim: "counter".to_string(),
            reason: format!("unrecognised counter change {}", change),
        }
    }
}

impl DiffStrategy for CounterDiff {
    fn diff(&self, from: Option<&Value>, to: &Value) -> Value {
        match (from.and_then(Value::as_i64), to.as_i64()) {
            (Some(a), Some(b)) => json!({ "add": b - a }),
            _ => json!({ "set": to }),
        }
    }

    fn apply(&self, base: Option<&Value>, change: &Value) -> Result<Value> {
        if let Some(value) = Self::part(change, "set") {
            return Ok(json!(value));
        }
        let delta = Self::part(change, "add").ok_or_else(|| Self::invalid(change))?;
        let current = base.and_then(Value::as_i64).unwrap_or(0);
        Ok(json!(current + delta))
    }

    fn compose(&self, older: &Value, newer: &Value) -> Result<Value> {
        if self.is_snapshot(newer) {
            return Ok(newer.clone());
        }
        let add = Self::part(newer, "add").ok_or_else(|| Self::invalid(newer))?;
        if let Some(base) = Self::part(older, "set") {
            return Ok(json!({ "set": base + add }));
        }
        let prior = Self::part(older, "add").ok_or_else(|| Self::invalid(older))?;
        Ok(json!({ "add": prior + add }))
    }

    fn is_snapshot(&self, change: &Value) -> bool {
        change.get("set").is_some()
    }
}

/// Schema of a single dimension.
#[derive(Clone, Debug)]
pub struct DimensionSchema {
    pub name: String,
    pub diff: Option<Arc<dyn DiffStrategy>>,
}

/// Declared dimensions of one type.
#[derive(Clone, Debug)]
pub struct TypeSchema {
    pub name: String,
    pub dimensions: BTreeMap<String, DimensionSchema>,
}

impl TypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimensions: BTreeMap::new(),
        }
    }

    /// Declare a plain dimension.
    pub fn dimension(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.dimensions.insert(
            name.clone(),
            DimensionSchema { name, diff: None },
        );
        self
    }

    /// Declare a dimension that travels as incremental changes.
    pub fn custom_dimension(mut self, name: impl Into<String>, diff: Arc<dyn DiffStrategy>) -> Self {
        let name = name.into();
        self.dimensions.insert(
            name.clone(),
            DimensionSchema {
                name,
                diff: Some(diff),
            },
        );
        self
    }
}

/// Registry of type schemas, passed by reference to whoever needs it.
///
/// Types that are not registered behave as if all their dimensions were plain.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    types: BTreeMap<String, TypeSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, schema: TypeSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn register(&mut self, schema: TypeSchema) {
        self.types.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeSchema> {
        self.types.get(type_name)
    }

    /// Custom-diff strategy of a dimension, if it has one.
    pub fn strategy(&self, type_name: &str, dim: &str) -> Option<&Arc<dyn DiffStrategy>> {
        self.types
            .get(type_name)
            .and_then(|tp| tp.dimensions.get(dim))
            .and_then(|d| d.diff.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_diff_and_apply() {
        let counter = CounterDiff;
        let snapshot = counter.diff(None, &json!(5));
        assert!(counter.is_snapshot(&snapshot));
        assert_eq!(counter.apply(None, &snapshot).unwrap(), json!(5));

        let change = counter.diff(Some(&json!(5)), &json!(8));
        assert_eq!(change, json!({"add": 3}));
        assert!(!counter.is_snapshot(&change));
        assert_eq!(counter.apply(Some(&json!(5)), &change).unwrap(), json!(8));
    }

    #[test]
    fn test_counter_compose() {
        let counter = CounterDiff;
        let composed = counter.compose(&json!({"add": 2}), &json!({"add": 3})).unwrap();
        assert_eq!(composed, json!({"add": 5}));
        let composed = counter.compose(&json!({"set": 2}), &json!({"add": 3})).unwrap();
        assert_eq!(composed, json!({"set": 5}));
        let composed = counter.compose(&json!({"add": 2}), &json!({"set": 9})).unwrap();
        assert_eq!(composed, json!({"set": 9}));
    }

    #[test]
    fn test_counter_rejects_garbage() {
        assert!(CounterDiff.apply(None, &json!("nope")).is_err());
        assert!(CounterDiff.compose(&json!({"add": 1}), &json!({})).is_err());
    }

    #[test]
    fn test_schema_lookup() {
        let schema = Schema::new().with_type(
            TypeSchema::new("Car")
                .dimension("name")
                .custom_dimension("count", Arc::new(CounterDiff)),
        );
        assert!(schema.strategy("Car", "count").is_some());
        assert!(schema.strategy("Car", "name").is_none());
        assert!(schema.strategy("Bike", "count").is_none());
    }
}
