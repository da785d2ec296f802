//! Sequential composition of deltas.
//!
//! `compose(a, b)` is the single delta equivalent to applying `a` and then
//! `b`. It is used to collapse runs of edges during GC and to fold a path of
//! edges into one delta for checkout.

use spacetime_core::{Delta, DeltaError, Event, ObjectChange, Result, Schema};

/// Delta equivalent to `older` followed by `newer`.
pub fn compose(schema: &Schema, older: &Delta, newer: &Delta) -> Result<Delta> {
    let mut result = older.clone();
    for (tp, oid, change) in newer.objects() {
        let merged = match older.get(tp, oid) {
            None => Some(change.clone()),
            Some(previous) => compose_object(schema, tp, oid, previous, change)?,
        };
        match merged {
            Some(merged) => result.insert(tp, oid, merged),
            None => {
                result.remove(tp, oid);
            }
        }
    }
    Ok(result)
}

/// Fold a sequence of deltas, oldest first.
pub fn compose_all<'a, I>(schema: &Schema, deltas: I) -> Result<Delta>
where
    I: IntoIterator<Item = &'a Delta>,
{
    deltas
        .into_iter()
        .try_fold(Delta::new(), |acc, delta| compose(schema, &acc, delta))
}

/// Compose two change records of the same object. `None` means the object
/// never becomes visible (created and deleted within the window).
pub fn compose_object(
    schema: &Schema,
    type_name: &str,
    oid: &str,
    older: &ObjectChange,
    newer: &ObjectChange,
) -> Result<Option<ObjectChange>> {
    let before = older.event(type_name).unwrap_or(Event::Modification);
    let after = newer.event(type_name).unwrap_or(Event::Modification);
    match (before, after) {
        (Event::New, Event::Delete) => Ok(None),
        (_, Event::Delete) => Ok(Some(newer.clone())),
        // A `New` can only follow a delete, possibly folded into `older` already.
        (_, Event::New) => Ok(Some(newer.clone())),
        (Event::Delete, Event::Modification) => {
            Err(DeltaError::ImpossibleSequence {
                type_name: type_name.to_string(),
                oid: oid.to_string(),
                older: before,
                newer: after,
            })
        }
        (_, Event::Modification) => {
            let mut merged = older.clone();
            for (tp, event) in &newer.types {
                let kept = match merged.types.get(tp) {
                    Some(Event::New) => Event::New,
                    _ => *event,
                };
                merged.types.insert(tp.clone(), kept);
            }
            for (dim, value) in &newer.dims {
                let combined = match (schema.strategy(type_name, dim), merged.dims.get(dim)) {
                    (Some(strategy), Some(previous)) => strategy.compose(previous, value)?,
                    _ => value.clone(),
                };
                merged.dims.insert(dim.clone(), combined);
            }
            Ok(Some(merged))
        }
    }
}
