use spacetime_compaction::CompactionError;
use spacetime_core::{DeltaError, TransactionId, VersionId};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the version graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Some edges never became attachable: their source version is neither
    /// present nor created by another edge of the same batch.
    #[error("Cannot add edges, unknown source versions: {0:?}")]
    CannotAddEdges(Vec<(VersionId, VersionId)>),

    #[error("Edge {from} -> {to} would close a cycle")]
    Cycle { from: VersionId, to: VersionId },

    #[error("Unknown version: {0}")]
    UnknownVersion(VersionId),

    #[error("Missing edge {0} -> {1}")]
    MissingEdge(VersionId, VersionId),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    #[error("Graph invariant violated: {0}")]
    InvariantViolated(String),

    #[error("No change observed within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Compaction(#[from] CompactionError),
}

pub type Result<T> = std::result::Result<T, GraphError>;
