//! # spacetime-graph
//!
//! The version graph: a DAG of immutable versions joined by delta-carrying
//! edges, shared by the local heap and every remote link.
//!
//! - [`VersionGraph::get`] hands a peer the edges it is missing
//! - [`VersionGraph::put`] integrates edges, merges forks and collects
//! - confirmation bookkeeping ([`VersionGraph::confirm`],
//!   [`VersionGraph::acknowledge`]) tracks which version every observer holds,
//!   so garbage collection never removes a state someone still needs
//!
//! ## Example
//!
//! ```rust
//! use spacetime_core::{Delta, Event, ObjectChange, PeerId, VersionId};
//! use spacetime_graph::{Edge, GraphConfig, VersionGraph};
//! use std::collections::BTreeMap;
//!
//! let graph = VersionGraph::new("node-a", GraphConfig::default());
//! let mut delta = Delta::new();
//! delta.insert(
//!     "Counter",
//!     "c1",
//!     ObjectChange::new("Counter", Event::New).with_dim("count", serde_json::json!(1)),
//! );
//! let head = graph
//!     .put(
//!         &PeerId::from("node-b"),
//!         &BTreeMap::new(),
//!         vec![Edge::new(VersionId::root(), "v1", delta, "e1")],
//!     )
//!     .unwrap();
//! assert_eq!(head, VersionId::from("v1"));
//! ```

mod alias;
mod arena;
pub mod config;
pub mod error;
mod gc;
mod graph;
mod refs;
pub mod version;

pub use alias::AliasTable;
pub use config::{GraphConfig, GraphConfigBuilder};
pub use error::{GraphError, Result};
pub use graph::{GetResult, VersionGraph};
pub use refs::{Frontier, RefTracker};
pub use spacetime_compaction::GcStats;
pub use version::{Edge, Version};
