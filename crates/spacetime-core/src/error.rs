//! Error type shared by the delta model and the delta algebra.

use crate::event::Event;
use thiserror::Error;

/// Errors raised while building, composing or transforming deltas.
///
/// Every variant except `Resolver` signals corrupted history: the caller must
/// abort the operation instead of recovering.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeltaError {
    #[error("impossible event pair on {type_name}/{oid}: {current:?} against {conflicting:?}")]
    ImpossibleEventPair {
        type_name: String,
        oid: String,
        current: Event,
        conflicting: Event,
    },

    #[error("impossible event sequence on {type_name}/{oid}: {older:?} followed by {newer:?}")]
    ImpossibleSequence {
        type_name: String,
        oid: String,
        older: Event,
        newer: Event,
    },

    #[error("invalid change for dimension {dim}: {reason}")]
    InvalidChange { dim: String, reason: String },

    #[error("custom resolver for type {type_name} failed: {message}")]
    Resolver { type_name: String, message: String },

    #[error("unknown event tag {0}")]
    UnknownEvent(u8),
}

pub type Result<T> = std::result::Result<T, DeltaError>;
