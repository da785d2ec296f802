//! Error types for the transport.

use spacetime_graph::GraphError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] serde_cbor::Error),

    #[error("Frame of {len} bytes exceeds the limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Connection closed by peer")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer kept refusing the link lock.
    #[error("Lock rejected by {peer} after {attempts} attempts")]
    LockRejected { peer: String, attempts: u32 },

    /// A long-poll fetch saw no new version in time.
    #[error("No new version received within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RemoteError {
    pub(crate) fn unexpected(expected: &str, got: &impl std::fmt::Debug) -> Self {
        RemoteError::Protocol(format!("expected {}, got {:?}", expected, got))
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
