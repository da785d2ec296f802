use spacetime_core::VersionId;
use thiserror::Error;

/// Errors that can occur while planning a collection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompactionError {
    #[error("Eid group {path:?} is not a single linear path: {reason}")]
    NonLinearGroup { path: Vec<VersionId>, reason: String },

    #[error("Unknown version in graph view: {0}")]
    UnknownVersion(VersionId),
}
