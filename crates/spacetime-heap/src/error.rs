//! Error types for the heap layer.

use spacetime_core::DeltaError;
use spacetime_graph::GraphError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeapError {
    #[error("Object ({type_name}, {oid}) already exists in the dataframe")]
    AlreadyExists { type_name: String, oid: String },

    #[error("Object ({type_name}, {oid}) not found")]
    NotFound { type_name: String, oid: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Delta(#[from] DeltaError),
}

impl HeapError {
    pub(crate) fn already_exists(type_name: &str, oid: &str) -> Self {
        HeapError::AlreadyExists {
            type_name: type_name.to_string(),
            oid: oid.to_string(),
        }
    }

    pub(crate) fn not_found(type_name: &str, oid: &str) -> Self {
        HeapError::NotFound {
            type_name: type_name.to_string(),
            oid: oid.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HeapError>;
