//! Dimension-level differences between two object change records.

use spacetime_core::Value;
use std::collections::BTreeMap;

/// Dimensions of `new` that are absent from `original` or carry a different value.
pub fn dim_diff(
    original: &BTreeMap<String, Value>,
    new: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    new.iter()
        .filter(|(dim, value)| original.get(*dim) != Some(*value))
        .map(|(dim, value)| (dim.clone(), value.clone()))
        .collect()
}

/// Dimensions of `new` that `original` does not mention at all.
pub fn dim_not_present(
    original: &BTreeMap<String, Value>,
    new: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    new.iter()
        .filter(|(dim, _)| !original.contains_key(*dim))
        .map(|(dim, value)| (dim.clone(), value.clone()))
        .collect()
}
