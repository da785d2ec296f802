//! The shared, lock-protected version graph.

use crate::arena::{Arena, MergeContext};
use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::refs::{Frontier, RefTracker};
use crate::version::Edge;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use spacetime_compaction::{GcStats, VersionDag};
use spacetime_core::{ObjectState, PeerId, Schema, TransactionId, Value, VersionId};
use spacetime_delta::{ResolverRegistry, State};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Answer to [`VersionGraph::get`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    /// Edges the requester is missing, parents before children.
    pub edges: Vec<Edge>,
    /// Head at the time of the read, under the requester's name for it.
    pub head: VersionId,
    /// References the responder declares, including its own head.
    pub remote_refs: BTreeMap<PeerId, VersionId>,
    /// Set when edges were offered; the requester confirms it after applying
    /// them.
    pub transaction_id: Option<TransactionId>,
    /// What the responder knows every other node to hold. The requester
    /// relays it back with [`VersionGraph::put_with`].
    #[serde(default)]
    pub frontier: Frontier,
}

/// A version graph shared by the local heap and every remote link.
///
/// The arena sits behind a task-fair `RwLock`: `get` and the read helpers
/// take it shared, `put` and garbage collection take it exclusively.
/// Reference bookkeeping has its own mutex, always locked after the arena.
pub struct VersionGraph {
    name: PeerId,
    config: GraphConfig,
    schema: Schema,
    resolvers: ResolverRegistry,
    arena: RwLock<Arena>,
    refs: Mutex<RefTracker>,
    generation: Mutex<u64>,
    changed: Condvar,
}

impl VersionGraph {
    pub fn new(name: impl Into<PeerId>, config: GraphConfig) -> Self {
        Self::with_resolvers(name, config, Schema::new(), ResolverRegistry::new())
    }

    pub fn with_resolvers(
        name: impl Into<PeerId>,
        config: GraphConfig,
        schema: Schema,
        resolvers: ResolverRegistry,
    ) -> Self {
        VersionGraph {
            name: name.into(),
            config,
            schema,
            resolvers,
            arena: RwLock::new(Arena::new()),
            refs: Mutex::new(RefTracker::new()),
            generation: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    pub fn name(&self) -> &PeerId {
        &self.name
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn merge_context(&self) -> MergeContext<'_> {
        MergeContext {
            schema: &self.schema,
            resolvers: &self.resolvers,
        }
    }

    // ------------------------------------------------------------------
    // get / put
    // ------------------------------------------------------------------

    /// Edges `peer` is missing given the versions it already holds.
    ///
    /// Unknown ids in `known` are ignored. When there is something to send,
    /// the head is offered to `peer` and stays pinned until the returned
    /// transaction is confirmed or abandoned.
    pub fn get(&self, peer: &PeerId, known: &[VersionId]) -> Result<GetResult> {
        let arena = self.arena.read();
        let mut holding = BTreeSet::new();
        for vid in known {
            let resolved = arena.resolve(vid);
            if arena.contains(&resolved) {
                holding.insert(resolved);
            } else {
                warn!(peer = %peer, version = %vid, "Ignoring unknown version");
            }
        }

        let head = arena.head_id().clone();
        let edges: Vec<Edge> = arena
            .edges_since(&holding)
            .into_iter()
            .map(|edge| Edge {
                from: arena.aliases.name_for(peer, &edge.from),
                to: arena.aliases.name_for(peer, &edge.to),
                ..edge
            })
            .collect();

        let head_here = head.clone();
        let head = arena.aliases.name_for(peer, &head);
        let (transaction_id, mut remote_refs, frontier) = {
            let mut refs = self.refs.lock();
            let transaction_id = if edges.is_empty() {
                None
            } else {
                Some(refs.offer(peer, head_here))
            };
            let remote_refs: BTreeMap<PeerId, VersionId> = refs
                .local_refs()
                .map(|(local, version)| (local.clone(), arena.aliases.name_for(peer, version)))
                .collect();
            let frontier: Frontier = refs
                .frontier_for(&self.name, peer)
                .into_iter()
                .map(|(node, held)| {
                    let held = held
                        .into_iter()
                        .map(|(name, version)| (name, arena.aliases.name_for(peer, &version)))
                        .collect();
                    (node, held)
                })
                .collect();
            (transaction_id, remote_refs, frontier)
        };
        debug!(peer = %peer, edges = edges.len(), head = %head, "Serving get");

        remote_refs.insert(self.name.clone(), head.clone());
        Ok(GetResult {
            edges,
            head,
            remote_refs,
            transaction_id,
            frontier,
        })
    }

    /// Integrate `edges` sent by `origin` and return the new head.
    ///
    /// Same as [`put_with`](Self::put_with) with nothing relayed about
    /// other nodes.
    pub fn put(
        &self,
        origin: &PeerId,
        remote_refs: &BTreeMap<PeerId, VersionId>,
        edges: Vec<Edge>,
    ) -> Result<VersionId> {
        self.put_with(origin, remote_refs, &Frontier::new(), edges)
    }

    /// Integrate `edges` sent by `origin` and return the new head.
    ///
    /// The whole batch is applied to a copy of the arena, merged, optionally
    /// collected and checked; the copy replaces the live arena only if every
    /// step succeeded. `remote_refs` replaces what `origin` declared last
    /// time; without any, the last edge's target stands in for its head.
    /// `frontier` replaces what `origin` relayed about other nodes; entries
    /// this graph cannot place are dropped, the node itself is still
    /// remembered.
    pub fn put_with(
        &self,
        origin: &PeerId,
        remote_refs: &BTreeMap<PeerId, VersionId>,
        frontier: &Frontier,
        edges: Vec<Edge>,
    ) -> Result<VersionId> {
        let mut arena = self.arena.write();
        let previous = arena.head_id().clone();
        let mut claimed = remote_refs.clone();
        if claimed.is_empty() {
            if let Some(edge) = edges.last() {
                claimed.insert(origin.clone(), edge.to.clone());
            }
        }

        let mut staged = arena.clone();
        let touched = staged.add_edges(origin, edges)?;
        let head = staged.complete(self.merge_context(), touched)?;
        let declared: BTreeMap<PeerId, VersionId> = claimed
            .into_iter()
            .map(|(name, vid)| (name, staged.resolve(&vid)))
            .filter(|(_, vid)| staged.contains(vid))
            .collect();
        let relayed: Frontier = frontier
            .iter()
            .filter(|(node, _)| *node != &self.name)
            .map(|(node, held)| {
                let held = held
                    .iter()
                    .map(|(name, vid)| (name.clone(), staged.resolve(vid)))
                    .filter(|(_, vid)| staged.contains(vid))
                    .collect();
                (node.clone(), held)
            })
            .collect();

        let mut refs = self.refs.lock();
        let mut tracked = refs.clone();
        tracked.remap(|vid| staged.resolve(vid));
        tracked.declare(origin, declared);
        tracked.record_frontier(origin, relayed);

        if self.config.auto_gc {
            let anchors = tracked.horizon(&self.name);
            let stats = staged.collect(&self.schema, &anchors, &BTreeSet::new())?;
            if !stats.is_noop() {
                debug!(?stats, "Collected after put");
            }
        }
        if self.config.check_invariants {
            staged.check_invariants()?;
        }

        *arena = staged;
        *refs = tracked;
        drop(refs);
        drop(arena);

        if head != previous {
            info!(origin = %origin, head = %head, "Head moved");
        }
        self.notify();
        Ok(head)
    }

    // ------------------------------------------------------------------
    // Confirmation bookkeeping
    // ------------------------------------------------------------------

    /// Record that the remote transaction `txid` from `origin` was applied.
    pub fn acknowledge(&self, origin: &PeerId, txid: TransactionId) {
        self.refs.lock().acknowledge(origin, txid);
    }

    /// Transactions from `peer` applied since the last drain.
    pub fn drain_confirmed(&self, peer: &PeerId) -> Vec<TransactionId> {
        self.refs.lock().drain_confirmed(peer)
    }

    /// `peer` consumed the offer `txid`; its reference moves to the offered
    /// head.
    pub fn confirm(&self, peer: &PeerId, txid: &TransactionId) -> Result<VersionId> {
        let _arena = self.arena.read();
        self.refs
            .lock()
            .confirm(peer, txid)
            .ok_or_else(|| GraphError::UnknownTransaction(txid.clone()))
    }

    /// Release an offer that will never be confirmed.
    pub fn abandon(&self, txid: &TransactionId) -> bool {
        let _arena = self.arena.read();
        self.refs.lock().abandon(txid)
    }

    /// Pin `version` as the one `peer` holds.
    pub fn confirm_local(&self, peer: &PeerId, version: &VersionId) -> Result<()> {
        let arena = self.arena.read();
        let resolved = arena.resolve(version);
        if !arena.contains(&resolved) {
            return Err(GraphError::UnknownVersion(version.clone()));
        }
        self.refs.lock().set_local(peer, resolved);
        Ok(())
    }

    /// Version `peer` confirmed holding.
    pub fn reference(&self, peer: &PeerId) -> Option<VersionId> {
        let _arena = self.arena.read();
        self.refs.lock().version_of(peer).cloned()
    }

    /// Refs `origin` declared with its last `put`.
    pub fn declared(&self, origin: &PeerId) -> BTreeMap<PeerId, VersionId> {
        let _arena = self.arena.read();
        self.refs
            .lock()
            .declared_by(origin)
            .cloned()
            .unwrap_or_default()
    }

    /// Every version `peer` is known to hold; what to pass as `known` when
    /// fetching on its behalf.
    pub fn known_by(&self, peer: &PeerId) -> Vec<VersionId> {
        let _arena = self.arena.read();
        self.refs.lock().known_by(peer)
    }

    pub fn pending_offers(&self) -> usize {
        let _arena = self.arena.read();
        self.refs.lock().pending_offers()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn head(&self) -> VersionId {
        self.arena.read().head_id().clone()
    }

    pub fn contains(&self, version: &VersionId) -> bool {
        let arena = self.arena.read();
        arena.contains(&arena.resolve(version))
    }

    pub fn resolve(&self, version: &VersionId) -> VersionId {
        self.arena.read().resolve(version)
    }

    pub fn version_count(&self) -> usize {
        self.arena.read().version_count()
    }

    pub fn edge_count(&self) -> usize {
        self.arena.read().edge_count()
    }

    pub fn heads(&self) -> Vec<VersionId> {
        self.arena.read().heads()
    }

    pub fn roots(&self) -> Vec<VersionId> {
        self.arena.read().roots()
    }

    pub fn parents(&self, version: &VersionId) -> BTreeSet<VersionId> {
        let arena = self.arena.read();
        arena.parents(&arena.resolve(version))
    }

    pub fn children(&self, version: &VersionId) -> BTreeSet<VersionId> {
        let arena = self.arena.read();
        arena.children(&arena.resolve(version))
    }

    pub fn edge(&self, from: &VersionId, to: &VersionId) -> Option<Edge> {
        let arena = self.arena.read();
        arena
            .edge(&arena.resolve(from), &arena.resolve(to))
            .cloned()
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.arena.read().check_invariants()
    }

    /// Edges along one path from `from` to the head.
    pub fn path_to_head(&self, from: &VersionId) -> Result<Vec<Edge>> {
        let arena = self.arena.read();
        arena.path_to_head(&arena.resolve(from))
    }

    /// Like [`path_to_head`](Self::path_to_head), and pins the head for
    /// `peer` before the read lock is released.
    pub fn checkout_path(&self, peer: &PeerId, from: &VersionId) -> Result<(Vec<Edge>, VersionId)> {
        let arena = self.arena.read();
        let path = arena.path_to_head(&arena.resolve(from))?;
        let head = arena.head_id().clone();
        self.refs.lock().set_local(peer, head.clone());
        Ok((path, head))
    }

    pub fn path_to_root(&self, version: &VersionId) -> Result<Vec<Edge>> {
        let arena = self.arena.read();
        arena.path_to_root(&arena.resolve(version))
    }

    /// Full object state at `version`.
    pub fn state_at(&self, version: &VersionId) -> Result<State> {
        let arena = self.arena.read();
        arena.state_at(&self.schema, &arena.resolve(version))
    }

    pub fn object_at(&self, version: &VersionId, type_name: &str, oid: &str) -> Result<Option<ObjectState>> {
        let arena = self.arena.read();
        arena.object_at(&self.schema, &arena.resolve(version), type_name, oid)
    }

    /// One dimension of one object at `version`.
    pub fn read_dimension_at(
        &self,
        version: &VersionId,
        type_name: &str,
        oid: &str,
        dim: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .object_at(version, type_name, oid)?
            .and_then(|object| object.get_dimension(dim).cloned()))
    }

    // ------------------------------------------------------------------
    // Change notification
    // ------------------------------------------------------------------

    fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.changed.notify_all();
    }

    fn has_news_for(&self, known: &[VersionId]) -> bool {
        let arena = self.arena.read();
        let head = arena.head_id();
        let holding: Vec<VersionId> = known
            .iter()
            .map(|vid| arena.resolve(vid))
            .filter(|vid| arena.contains(vid))
            .collect();
        if holding.is_empty() {
            !head.is_root()
        } else {
            holding.iter().any(|vid| vid != head)
        }
    }

    /// Block until the graph holds something a peer with `known` lacks.
    pub fn wait_for_change(&self, known: &[VersionId], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        loop {
            if self.has_news_for(known) {
                return Ok(());
            }
            if self.changed.wait_until(&mut generation, deadline).timed_out() {
                return if self.has_news_for(known) {
                    Ok(())
                } else {
                    Err(GraphError::Timeout(timeout))
                };
            }
        }
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    pub fn garbage_collect(&self) -> Result<GcStats> {
        self.garbage_collect_ignoring(&BTreeSet::new())
    }

    /// Collect while keeping `ignore` alive in addition to every tracked
    /// reference.
    pub fn garbage_collect_ignoring(&self, ignore: &BTreeSet<VersionId>) -> Result<GcStats> {
        let mut arena = self.arena.write();
        let observers = self.refs.lock().horizon(&self.name);
        let mut staged = arena.clone();
        let stats = staged.collect(&self.schema, &observers, ignore)?;
        if self.config.check_invariants {
            staged.check_invariants()?;
        }
        *arena = staged;
        if !stats.is_noop() {
            info!(
                versions_removed = stats.versions_removed,
                edges_removed = stats.edges_removed,
                groups = stats.groups_collapsed,
                "Garbage collected"
            );
        }
        Ok(stats)
    }
}

impl std::fmt::Debug for VersionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionGraph")
            .field("name", &self.name)
            .field("head", &self.head())
            .field("versions", &self.version_count())
            .finish()
    }
}
