//! Per-peer link state shared by the client and server halves of an
//! endpoint.

use parking_lot::Mutex;
use spacetime_core::{PeerId, TransactionId, VersionId};
use spacetime_graph::VersionGraph;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct LinkState {
    /// Last head we sent the peer and it accepted.
    version_from_self: Option<VersionId>,
    /// Last head the peer sent us and we applied.
    version_from_remote: Option<VersionId>,
    /// Offer of ours currently on the wire.
    outstanding: Option<TransactionId>,
}

/// Everything an endpoint remembers about one peer.
///
/// While a push or fetch to the peer is running the link is *active*. An
/// incoming request from the same peer during that time is refused with
/// `LockReject` when our tie-breaker is lower (names break exact ties).
#[derive(Debug)]
pub struct PeerLink {
    peer: PeerId,
    local_tie: u64,
    remote_tie: AtomicU64,
    active: AtomicUsize,
    state: Mutex<LinkState>,
}

impl PeerLink {
    pub fn new(peer: PeerId, local_tie: u64) -> Self {
        PeerLink {
            peer,
            local_tie,
            remote_tie: AtomicU64::new(u64::MAX),
            active: AtomicUsize::new(0),
            state: Mutex::new(LinkState::default()),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn local_tie(&self) -> u64 {
        self.local_tie
    }

    pub fn remote_tie(&self) -> u64 {
        self.remote_tie.load(Ordering::Acquire)
    }

    pub(crate) fn set_remote_tie(&self, tie: u64) {
        self.remote_tie.store(tie, Ordering::Release);
    }

    /// Mark the link busy until the guard drops.
    pub fn activate(&self) -> ActiveGuard<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveGuard { link: self }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }

    /// Whether a request arriving from the peer now must be refused.
    pub fn should_reject(&self, own_name: &PeerId) -> bool {
        self.is_active() && (self.local_tie, own_name) < (self.remote_tie(), &self.peer)
    }

    pub fn version_from_self(&self) -> Option<VersionId> {
        self.state.lock().version_from_self.clone()
    }

    pub fn version_from_remote(&self) -> Option<VersionId> {
        self.state.lock().version_from_remote.clone()
    }

    pub(crate) fn set_version_from_self(&self, version: VersionId) {
        self.state.lock().version_from_self = Some(version);
    }

    pub(crate) fn set_version_from_remote(&self, version: VersionId) {
        self.state.lock().version_from_remote = Some(version);
    }

    pub fn outstanding(&self) -> Option<TransactionId> {
        self.state.lock().outstanding.clone()
    }

    pub(crate) fn set_outstanding(&self, txid: Option<TransactionId>) {
        self.state.lock().outstanding = txid;
    }

    /// Versions both sides hold, as far as this link saw, that still exist
    /// in `graph`. Offers to the peer start after these.
    pub(crate) fn shared_versions(&self, graph: &VersionGraph) -> Vec<VersionId> {
        let state = self.state.lock();
        let mut versions: Vec<VersionId> = state
            .version_from_self
            .iter()
            .chain(state.version_from_remote.iter())
            .filter(|version| graph.contains(version))
            .cloned()
            .collect();
        versions.dedup();
        versions
    }
}

/// Keeps a [`PeerLink`] active while alive.
#[must_use]
#[derive(Debug)]
pub struct ActiveGuard<'a> {
    link: &'a PeerLink,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.link.active.fetch_sub(1, Ordering::AcqRel);
    }
}
