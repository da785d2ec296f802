//! # spacetime-heap
//!
//! The managed heap on top of a [`VersionGraph`](spacetime_graph::VersionGraph):
//! a [`Dataframe`] keeps a working copy of the objects at one version,
//! stages local writes as a delta, commits them as a single edge and checks
//! out whatever other writers committed in the meantime.
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use spacetime_core::ObjectState;
//! use spacetime_graph::{GraphConfig, VersionGraph};
//! use spacetime_heap::Dataframe;
//! use std::sync::Arc;
//!
//! let graph = Arc::new(VersionGraph::new("node", GraphConfig::default()));
//! let writer = Dataframe::new("writer", Arc::clone(&graph));
//! let reader = Dataframe::new("reader", graph);
//!
//! writer.add(ObjectState::new("Car", "0").with_dimension("speed", json!(40))).unwrap();
//! writer.commit().unwrap();
//!
//! reader.checkout().unwrap();
//! assert_eq!(reader.read_dimension("Car", "0", "speed"), Some(json!(40)));
//! ```

pub mod dataframe;
pub mod error;
pub mod staging;

pub use dataframe::Dataframe;
pub use error::{HeapError, Result};
pub use staging::StagedDiff;
