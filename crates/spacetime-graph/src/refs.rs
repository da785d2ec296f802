//! Reference tracking: which versions each observer currently holds.
//!
//! Three kinds of reference pin versions against garbage collection:
//! - confirmed references (`node_to_version`): a remote confirmed an offer,
//!   or a local heap checked a version out,
//! - declared references: the refs a remote sent along with its last `put`,
//!   its own head and its local heaps included,
//! - pending offers (`version_to_required`): a head that `get` handed to a
//!   peer which has not confirmed consuming it yet.
//!
//! The confirmation queue (`node_to_confirmed`) holds transactions applied on
//! behalf of a remote until they are reported back to it.
//!
//! Beyond pinning, the tracker bounds the stability horizon. Every other
//! node it has heard of anchors the horizon at what that node is known to
//! hold, by its own report or relayed by a third node. A node that has not
//! both reported its refs and confirmed one of our offers anchors it at ROOT:
//! it may still send us edges from anywhere.

use spacetime_compaction::Observer;
use spacetime_core::{PeerId, TransactionId, VersionId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Per node, the refs it is known to hold: its own head and its local heaps.
pub type Frontier = BTreeMap<PeerId, BTreeMap<PeerId, VersionId>>;

#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingOffer {
    peer: PeerId,
    version: VersionId,
}

#[derive(Clone, Debug, Default)]
pub struct RefTracker {
    node_to_version: BTreeMap<PeerId, VersionId>,
    local: BTreeSet<PeerId>,
    declared: BTreeMap<PeerId, BTreeMap<PeerId, VersionId>>,
    offers: BTreeMap<TransactionId, PendingOffer>,
    version_to_required: HashMap<VersionId, BTreeSet<TransactionId>>,
    node_to_confirmed: HashMap<PeerId, Vec<TransactionId>>,
    /// Frontier each origin relayed with its last `put`.
    frontier_from: BTreeMap<PeerId, Frontier>,
}

impl RefTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version `peer` confirmed holding.
    pub fn version_of(&self, peer: &PeerId) -> Option<&VersionId> {
        self.node_to_version.get(peer)
    }

    /// Refs `origin` declared with its last `put`.
    pub fn declared_by(&self, origin: &PeerId) -> Option<&BTreeMap<PeerId, VersionId>> {
        self.declared.get(origin)
    }

    /// Every version `peer` is known to hold.
    pub fn known_by(&self, peer: &PeerId) -> Vec<VersionId> {
        let mut known: BTreeSet<VersionId> = self.version_of(peer).cloned().into_iter().collect();
        if let Some(declared) = self.declared.get(peer) {
            known.extend(declared.values().cloned());
        }
        known.into_iter().collect()
    }

    /// Move `peer`'s confirmed reference to `version`.
    pub fn set(&mut self, peer: &PeerId, version: VersionId) {
        self.node_to_version.insert(peer.clone(), version);
    }

    /// Like [`set`](Self::set), for a heap living in this process. Local refs
    /// are declared to remotes on every `get`. What the heap declared with
    /// its last commit is superseded.
    pub fn set_local(&mut self, peer: &PeerId, version: VersionId) {
        self.local.insert(peer.clone());
        self.declared.remove(peer);
        self.set(peer, version);
    }

    pub fn local_refs(&self) -> impl Iterator<Item = (&PeerId, &VersionId)> {
        self.local
            .iter()
            .filter_map(|peer| self.node_to_version.get(peer).map(|version| (peer, version)))
    }

    /// Replace the refs `origin` declares.
    pub fn declare(&mut self, origin: &PeerId, refs: BTreeMap<PeerId, VersionId>) {
        self.declared.insert(origin.clone(), refs);
    }

    /// Replace what `origin` relayed about other nodes.
    pub fn record_frontier(&mut self, origin: &PeerId, frontier: Frontier) {
        if frontier.is_empty() {
            self.frontier_from.remove(origin);
        } else {
            self.frontier_from.insert(origin.clone(), frontier);
        }
    }

    pub fn frontier_from(&self, origin: &PeerId) -> Option<&Frontier> {
        self.frontier_from.get(origin)
    }

    /// Every other node heard of: origins of puts, peers we offered to and
    /// nodes named in relayed frontiers. Local heaps are not nodes.
    pub fn nodes(&self, own: &PeerId) -> BTreeSet<PeerId> {
        let mut nodes: BTreeSet<PeerId> = self.declared.keys().cloned().collect();
        nodes.extend(self.node_to_version.keys().cloned());
        nodes.extend(self.offers.values().map(|offer| offer.peer.clone()));
        for (origin, frontier) in &self.frontier_from {
            nodes.insert(origin.clone());
            nodes.extend(frontier.keys().cloned());
        }
        nodes.retain(|node| node != own && !self.local.contains(node));
        nodes
    }

    fn has_reported(&self, node: &PeerId) -> bool {
        self.declared.get(node).map_or(false, |refs| !refs.is_empty())
            || self
                .frontier_from
                .values()
                .any(|frontier| frontier.get(node).map_or(false, |refs| !refs.is_empty()))
    }

    /// What to relay to `recipient` about every other node: the node's own
    /// last report, else the first relayed one. Nodes known only by name go
    /// out with no refs.
    pub fn frontier_for(&self, own: &PeerId, recipient: &PeerId) -> Frontier {
        self.nodes(own)
            .into_iter()
            .filter(|node| node != recipient)
            .map(|node| {
                let refs = self
                    .declared
                    .get(&node)
                    .filter(|refs| !refs.is_empty())
                    .or_else(|| {
                        self.frontier_from
                            .values()
                            .filter_map(|frontier| frontier.get(&node))
                            .find(|refs| !refs.is_empty())
                    })
                    .cloned()
                    .unwrap_or_default();
                (node, refs)
            })
            .collect()
    }

    /// Register that `version` was offered to `peer` and return the
    /// transaction the peer confirms with.
    pub fn offer(&mut self, peer: &PeerId, version: VersionId) -> TransactionId {
        let txid = TransactionId::generate();
        self.version_to_required
            .entry(version.clone())
            .or_default()
            .insert(txid.clone());
        self.offers.insert(
            txid.clone(),
            PendingOffer {
                peer: peer.clone(),
                version,
            },
        );
        txid
    }

    fn take_offer(&mut self, txid: &TransactionId) -> Option<PendingOffer> {
        let offer = self.offers.remove(txid)?;
        if let Some(required) = self.version_to_required.get_mut(&offer.version) {
            required.remove(txid);
            if required.is_empty() {
                self.version_to_required.remove(&offer.version);
            }
        }
        Some(offer)
    }

    /// `peer` consumed the offer `txid`: its reference moves to the offered
    /// version. Returns that version, or `None` for unknown or foreign
    /// transactions.
    pub fn confirm(&mut self, peer: &PeerId, txid: &TransactionId) -> Option<VersionId> {
        match self.offers.get(txid) {
            Some(offer) if &offer.peer == peer => {}
            _ => return None,
        }
        let offer = self.take_offer(txid)?;
        debug!(peer = %peer, txid = %txid, version = %offer.version, "Offer confirmed");
        self.set(peer, offer.version.clone());
        Some(offer.version)
    }

    /// Release an offer the peer will never consume.
    pub fn abandon(&mut self, txid: &TransactionId) -> bool {
        self.take_offer(txid).is_some()
    }

    /// Queue `txid` to be reported back to `origin` as applied.
    pub fn acknowledge(&mut self, origin: &PeerId, txid: TransactionId) {
        self.node_to_confirmed
            .entry(origin.clone())
            .or_default()
            .push(txid);
    }

    pub fn drain_confirmed(&mut self, peer: &PeerId) -> Vec<TransactionId> {
        self.node_to_confirmed.remove(peer).unwrap_or_default()
    }

    pub fn pending_offers(&self) -> usize {
        self.offers.len()
    }

    /// Rewrite every tracked version through `resolve`, after versions were
    /// equated.
    pub fn remap(&mut self, resolve: impl Fn(&VersionId) -> VersionId) {
        for version in self.node_to_version.values_mut() {
            *version = resolve(version);
        }
        for refs in self.declared.values_mut() {
            for version in refs.values_mut() {
                *version = resolve(version);
            }
        }
        for frontier in self.frontier_from.values_mut() {
            for version in frontier.values_mut().flat_map(|refs| refs.values_mut()) {
                *version = resolve(version);
            }
        }
        self.version_to_required.clear();
        for (txid, offer) in self.offers.iter_mut() {
            offer.version = resolve(&offer.version);
            self.version_to_required
                .entry(offer.version.clone())
                .or_default()
                .insert(txid.clone());
        }
    }

    /// Every version currently pinned.
    pub fn pinned(&self) -> BTreeSet<VersionId> {
        self.node_to_version
            .values()
            .chain(self.declared.values().flat_map(|refs| refs.values()))
            .chain(self.version_to_required.keys())
            .cloned()
            .collect()
    }

    /// One observer per confirmed reference, declared reference and pending
    /// offer.
    pub fn observers(&self) -> Vec<Observer> {
        let confirmed = self
            .node_to_version
            .iter()
            .map(|(peer, version)| Observer::new(format!("ref:{}", peer), version.clone()));
        let declared = self.declared.iter().flat_map(|(origin, refs)| {
            refs.iter().map(move |(name, version)| {
                Observer::new(format!("declared:{}/{}", origin, name), version.clone())
            })
        });
        let offers = self
            .offers
            .iter()
            .map(|(txid, offer)| Observer::new(format!("offer:{}", txid), offer.version.clone()));
        confirmed.chain(declared).chain(offers).collect()
    }

    /// The observers plus every anchor of the stability horizon: relayed
    /// frontiers, and ROOT for each node that has not both reported what it
    /// holds and confirmed an offer of ours.
    pub fn horizon(&self, own: &PeerId) -> Vec<Observer> {
        let mut anchors = self.observers();
        for (origin, frontier) in &self.frontier_from {
            for (node, refs) in frontier {
                if node == own || self.local.contains(node) {
                    continue;
                }
                anchors.extend(refs.iter().map(|(name, version)| {
                    Observer::new(format!("frontier:{}/{}/{}", origin, node, name), version.clone())
                }));
            }
        }
        for node in self.nodes(own) {
            if !self.has_reported(&node) || !self.node_to_version.contains_key(&node) {
                anchors.push(Observer::new(format!("floor:{}", node), VersionId::root()));
            }
        }
        anchors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionId {
        VersionId::from(s)
    }

    #[test]
    fn test_set_moves_reference() {
        let peer = PeerId::from("a");
        let mut refs = RefTracker::new();
        refs.set(&peer, v("v1"));
        refs.set(&peer, v("v2"));
        assert_eq!(refs.version_of(&peer), Some(&v("v2")));
        assert_eq!(refs.pinned(), BTreeSet::from([v("v2")]));
    }

    #[test]
    fn test_declared_refs_are_replaced_per_origin() {
        let (a, heap) = (PeerId::from("a"), PeerId::from("a-heap"));
        let mut refs = RefTracker::new();
        refs.declare(&a, BTreeMap::from([(a.clone(), v("v2")), (heap.clone(), v("v1"))]));
        assert_eq!(refs.known_by(&a), vec![v("v1"), v("v2")]);
        assert_eq!(refs.observers().len(), 2);

        refs.declare(&a, BTreeMap::from([(a.clone(), v("v3"))]));
        assert_eq!(refs.pinned(), BTreeSet::from([v("v3")]));
        assert_eq!(refs.declared_by(&a).map(|d| d.len()), Some(1));
    }

    #[test]
    fn test_local_refs_are_listed() {
        let (heap, remote) = (PeerId::from("heap"), PeerId::from("remote"));
        let mut refs = RefTracker::new();
        refs.declare(&heap, BTreeMap::from([(heap.clone(), v("v0"))]));
        refs.set_local(&heap, v("v1"));
        refs.set(&remote, v("v2"));
        let local: Vec<_> = refs.local_refs().collect();
        assert_eq!(local, vec![(&heap, &v("v1"))]);
        assert!(refs.declared_by(&heap).is_none());
    }

    #[test]
    fn test_offer_pins_until_confirmed() {
        let peer = PeerId::from("a");
        let mut refs = RefTracker::new();
        let txid = refs.offer(&peer, v("v3"));
        assert!(refs.pinned().contains(&v("v3")));
        assert_eq!(refs.observers().len(), 1);

        assert_eq!(refs.confirm(&PeerId::from("b"), &txid), None);
        assert_eq!(refs.confirm(&peer, &txid), Some(v("v3")));
        assert_eq!(refs.pending_offers(), 0);
        assert_eq!(refs.version_of(&peer), Some(&v("v3")));
        assert_eq!(refs.confirm(&peer, &txid), None);
    }

    #[test]
    fn test_abandon_releases_offer() {
        let peer = PeerId::from("a");
        let mut refs = RefTracker::new();
        let txid = refs.offer(&peer, v("v3"));
        assert!(refs.abandon(&txid));
        assert!(refs.pinned().is_empty());
        assert!(!refs.abandon(&txid));
    }

    #[test]
    fn test_confirmation_queue_drains() {
        let origin = PeerId::from("a");
        let mut refs = RefTracker::new();
        refs.acknowledge(&origin, TransactionId::from("t1"));
        refs.acknowledge(&origin, TransactionId::from("t2"));
        assert_eq!(refs.drain_confirmed(&origin).len(), 2);
        assert!(refs.drain_confirmed(&origin).is_empty());
    }

    fn floors(observers: &[Observer]) -> Vec<String> {
        observers
            .iter()
            .filter(|o| o.label.starts_with("floor:"))
            .map(|o| o.label.clone())
            .collect()
    }

    #[test]
    fn test_unconfirmed_or_silent_nodes_anchor_at_root() {
        let (own, b, c) = (PeerId::from("a"), PeerId::from("b"), PeerId::from("c"));
        let mut refs = RefTracker::new();
        refs.declare(&b, BTreeMap::from([(b.clone(), v("v2"))]));
        let txid = refs.offer(&c, v("v1"));
        assert_eq!(refs.nodes(&own), BTreeSet::from([b.clone(), c.clone()]));
        assert_eq!(floors(&refs.horizon(&own)), vec!["floor:b", "floor:c"]);

        // b reported and confirmed; c confirmed but never reported.
        let txid_b = refs.offer(&b, v("v2"));
        refs.confirm(&b, &txid_b);
        refs.confirm(&c, &txid);
        assert_eq!(floors(&refs.horizon(&own)), vec!["floor:c"]);
    }

    #[test]
    fn test_relayed_frontier_counts_as_report() {
        let (own, b, c) = (PeerId::from("a"), PeerId::from("b"), PeerId::from("c"));
        let heap = PeerId::from("c-heap");
        let mut refs = RefTracker::new();
        refs.record_frontier(
            &b,
            Frontier::from([(c.clone(), BTreeMap::from([(c.clone(), v("v3")), (heap.clone(), v("v1"))]))]),
        );
        let txid = refs.offer(&c, v("v3"));
        refs.confirm(&c, &txid);

        let horizon = refs.horizon(&own);
        assert!(floors(&horizon).contains(&"floor:b".to_string()));
        assert!(!floors(&horizon).contains(&"floor:c".to_string()));
        assert!(horizon
            .iter()
            .any(|o| o.label == "frontier:b/c/c-heap" && o.version == v("v1")));
        assert!(!refs.nodes(&own).contains(&heap));
    }

    #[test]
    fn test_frontier_for_prefers_own_report() {
        let (own, b, c) = (PeerId::from("a"), PeerId::from("b"), PeerId::from("c"));
        let mut refs = RefTracker::new();
        refs.declare(&c, BTreeMap::from([(c.clone(), v("v5"))]));
        refs.record_frontier(&b, Frontier::from([(c.clone(), BTreeMap::from([(c.clone(), v("v2"))]))]));
        refs.offer(&PeerId::from("d"), v("v5"));

        let relayed = refs.frontier_for(&own, &b);
        assert_eq!(relayed.get(&c), Some(&BTreeMap::from([(c.clone(), v("v5"))])));
        assert_eq!(relayed.get(&PeerId::from("d")), Some(&BTreeMap::new()));
        assert!(!relayed.contains_key(&b));
        assert!(!relayed.contains_key(&own));
    }

    #[test]
    fn test_remap_follows_aliases() {
        let peer = PeerId::from("a");
        let mut refs = RefTracker::new();
        refs.set(&peer, v("alias"));
        refs.declare(&peer, BTreeMap::from([(peer.clone(), v("alias"))]));
        let txid = refs.offer(&peer, v("alias"));
        refs.remap(|vid| if vid == &v("alias") { v("canonical") } else { vid.clone() });
        assert_eq!(refs.version_of(&peer), Some(&v("canonical")));
        assert_eq!(refs.pinned(), BTreeSet::from([v("canonical")]));
        assert_eq!(refs.confirm(&peer, &txid), Some(v("canonical")));
    }
}
