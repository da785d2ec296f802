//! # spacetime-core
//!
//! Shared vocabulary of the spacetime version graph:
//! - identifiers for versions, eids, peers and transactions
//! - the per-type [`Event`] tags
//! - the [`Delta`] wire model (`{type: {oid: {"types": .., "dims": ..}}}`)
//! - materialised [`ObjectState`] and the per-type [`Schema`]

pub mod delta;
pub mod error;
pub mod event;
pub mod ids;
pub mod object;
pub mod schema;

pub use delta::{Delta, ObjectChange, TypeChanges, Value};
pub use error::{DeltaError, Result};
pub use event::Event;
pub use ids::{Eid, PeerId, TransactionId, VersionId};
pub use object::ObjectState;
pub use schema::{CounterDiff, DiffStrategy, DimensionSchema, Schema, TypeSchema};
