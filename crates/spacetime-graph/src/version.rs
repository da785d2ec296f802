//! Versions and the delta-carrying edges between them.

use serde::{Deserialize, Serialize};
use spacetime_core::{Delta, Eid, VersionId};
use std::collections::BTreeSet;

/// A node of the version graph: one immutable snapshot of the shared state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version {
    pub vid: VersionId,
    pub parents: BTreeSet<VersionId>,
    pub children: BTreeSet<VersionId>,
    /// Arena-local insertion counter, used to order siblings.
    pub created: u64,
}

impl Version {
    pub fn new(vid: VersionId, created: u64) -> Self {
        Self {
            vid,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            created,
        }
    }

    pub fn is_head(&self) -> bool {
        self.children.is_empty()
    }
}

/// A directed edge `from -> to` carrying the delta that turns one state into
/// the other.
///
/// On the wire an edge is the 4-tuple `(from, to, delta, eid)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "EdgeTuple", into = "EdgeTuple")]
pub struct Edge {
    pub from: VersionId,
    pub to: VersionId,
    pub delta: Delta,
    pub eid: Eid,
}

type EdgeTuple = (VersionId, VersionId, Delta, Eid);

impl From<EdgeTuple> for Edge {
    fn from((from, to, delta, eid): EdgeTuple) -> Self {
        Edge {
            from,
            to,
            delta,
            eid,
        }
    }
}

impl From<Edge> for EdgeTuple {
    fn from(edge: Edge) -> Self {
        (edge.from, edge.to, edge.delta, edge.eid)
    }
}

impl Edge {
    pub fn new(
        from: impl Into<VersionId>,
        to: impl Into<VersionId>,
        delta: Delta,
        eid: impl Into<Eid>,
    ) -> Self {
        Edge {
            from: from.into(),
            to: to.into(),
            delta,
            eid: eid.into(),
        }
    }

    pub fn key(&self) -> (VersionId, VersionId) {
        (self.from.clone(), self.to.clone())
    }
}
