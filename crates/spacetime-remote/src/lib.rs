//! # spacetime-remote
//!
//! Point-to-point replication between version graphs.
//!
//! Every node runs an [`Endpoint`] that serves incoming links, and opens a
//! [`Remote`] per peer it talks to. Frames are a 4-byte big-endian length
//! followed by a CBOR [`Message`]. On a link:
//!
//! - `push` offers the peer the edges it lacks; the peer applies them with
//!   `put` and later reports the transaction as confirmed
//! - `fetch` asks the peer for edges, optionally long-polling until it has
//!   something new; the puller acknowledges the offer after applying it
//! - when both ends of a link act at once, the end with the lower random
//!   tie-breaker wins and the other gets `LockReject` and retries
//!
//! ## Example
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> spacetime_remote::Result<()> {
//! use spacetime_core::{Delta, Eid, Event, ObjectChange, PeerId, VersionId};
//! use spacetime_graph::{Edge, GraphConfig, VersionGraph};
//! use spacetime_remote::{Endpoint, Remote, RemoteConfig};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let a = Arc::new(VersionGraph::new("A", GraphConfig::default()));
//! let b = Arc::new(VersionGraph::new("B", GraphConfig::default()));
//!
//! let mut delta = Delta::new();
//! delta.insert("Note", "1", ObjectChange::new("Note", Event::New));
//! a.put(&PeerId::from("A-heap"), &BTreeMap::new(), vec![Edge::new(VersionId::root(), "v1", delta, Eid::generate())])?;
//!
//! let (client, server) = tokio::io::duplex(1 << 16);
//! let serving = Endpoint::new(Arc::clone(&b), RemoteConfig::default());
//! tokio::spawn(serving.serve_connection(server));
//!
//! let remote = Remote::over(Endpoint::new(Arc::clone(&a), RemoteConfig::default()), client).await?;
//! remote.push(true).await?;
//! assert_eq!(b.head(), a.head());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod remote;

pub use config::{RemoteConfig, RemoteConfigBuilder};
pub use endpoint::Endpoint;
pub use error::{RemoteError, Result};
pub use link::{ActiveGuard, PeerLink};
pub use message::{Message, Payload, Request, RequestType, Response, Status};
pub use remote::Remote;
