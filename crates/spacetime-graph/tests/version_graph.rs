//! Integration tests for the version graph: put/get structure, merges,
//! aliasing, confirmation bookkeeping, GC and change notification.

use serde_json::json;
use spacetime_core::{Delta, Event, ObjectChange, PeerId, Schema, TransactionId, VersionId};
use spacetime_delta::{compose_all, ResolverError, ResolverRegistry, State};
use spacetime_graph::{Edge, GraphConfig, GraphConfigBuilder, GraphError, VersionGraph};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn v(s: &str) -> VersionId {
    VersionId::from(s)
}

fn peer(s: &str) -> PeerId {
    PeerId::from(s)
}

fn created(tp: &str, key: &str, value: &str) -> Delta {
    let mut delta = Delta::new();
    delta.insert(
        tp,
        "o1",
        ObjectChange::new(tp, Event::New).with_dim(key, json!(value)),
    );
    delta
}

fn count(event: Event, value: i64) -> Delta {
    let mut delta = Delta::new();
    delta.insert(
        "Counter",
        "0",
        ObjectChange::new("Counter", event).with_dim("count", json!(value)),
    );
    delta
}

fn no_gc() -> GraphConfig {
    GraphConfigBuilder::new().auto_gc(false).build()
}

fn no_refs() -> BTreeMap<PeerId, VersionId> {
    BTreeMap::new()
}

fn edge_map(edges: &[Edge]) -> BTreeMap<(VersionId, VersionId), (Delta, String)> {
    edges
        .iter()
        .map(|e| (e.key(), (e.delta.clone(), e.eid.to_string())))
        .collect()
}

fn single_head(graph: &VersionGraph) -> VersionId {
    let heads = graph.heads();
    assert_eq!(heads.len(), 1, "expected one head, found {:?}", heads);
    heads[0].clone()
}

// ============================================================================
// Put
// ============================================================================

#[test]
fn test_basic_put() {
    let graph = VersionGraph::new("VG", no_gc());
    let d0 = created("tp", "test_key", "test_value");
    let head = graph
        .put(&peer("VG"), &no_refs(), vec![Edge::new("ROOT", "0", d0.clone(), "Root-0")])
        .unwrap();

    assert_eq!(head, v("0"));
    assert_eq!(graph.version_count(), 2);
    assert_eq!(graph.edge(&v("ROOT"), &v("0")).unwrap().delta, d0);
    graph.check_invariants().unwrap();
}

#[test]
fn test_basic_put_continue() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "0", created("a", "k", "v"), "Root-0")])
        .unwrap();
    let head = graph
        .put(&vg, &no_refs(), vec![Edge::new("0", "1", created("b", "k", "v"), "0-1")])
        .unwrap();

    assert_eq!(head, v("1"));
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(graph.children(&v("0")), BTreeSet::from([v("1")]));
}

#[test]
fn test_merge_put_simple() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    let d0 = created("tp0", "test_key", "test_value");
    let d1 = created("tp1", "testkey", "testvalue");
    graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "0", d0.clone(), "Root-0")])
        .unwrap();
    let head = graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "1", d1.clone(), "Root-1")])
        .unwrap();

    assert_eq!(single_head(&graph), head);
    let edges = graph.get(&vg, &[v("ROOT")]).unwrap().edges;
    let expected: BTreeMap<_, _> = [
        ((v("ROOT"), v("0")), (d0.clone(), "Root-0".to_string())),
        ((v("ROOT"), v("1")), (d1.clone(), "Root-1".to_string())),
        ((v("1"), head.clone()), (d0, "Root-0".to_string())),
        ((v("0"), head.clone()), (d1, "Root-1".to_string())),
    ]
    .into_iter()
    .collect();
    assert_eq!(edge_map(&edges), expected);
}

#[test]
fn test_merge_put_two_levels() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    let d0 = created("tp0", "testkey0", "testvalue0");
    let d1 = created("tp1", "testkey1", "testvalue1");
    let d2 = created("tp2", "testkey2", "testvalue2");
    graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "0", d0.clone(), "Root-0")])
        .unwrap();
    graph
        .put(&vg, &no_refs(), vec![Edge::new("0", "1", d1.clone(), "0-1")])
        .unwrap();
    let merge2 = graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "2", d2.clone(), "Root-2")])
        .unwrap();

    let joined: Vec<VersionId> = graph
        .children(&v("0"))
        .intersection(&graph.children(&v("2")))
        .cloned()
        .collect();
    assert_eq!(joined.len(), 1);
    let merge1 = joined[0].clone();

    let edges = graph.get(&vg, &[v("ROOT")]).unwrap().edges;
    let expected: BTreeMap<_, _> = [
        ((v("ROOT"), v("0")), (d0.clone(), "Root-0".to_string())),
        ((v("0"), v("1")), (d1.clone(), "0-1".to_string())),
        ((v("ROOT"), v("2")), (d2.clone(), "Root-2".to_string())),
        ((v("0"), merge1.clone()), (d2.clone(), "Root-2".to_string())),
        ((v("2"), merge1.clone()), (d0, "Root-0".to_string())),
        ((v("1"), merge2.clone()), (d2, "Root-2".to_string())),
        ((merge1, merge2), (d1, "0-1".to_string())),
    ]
    .into_iter()
    .collect();
    assert_eq!(edge_map(&edges), expected);
    graph.check_invariants().unwrap();
}

#[test]
fn test_idempotent_put() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    let batch = vec![
        Edge::new("ROOT", "0", created("a", "k", "1"), "e0"),
        Edge::new("ROOT", "1", created("b", "k", "2"), "e1"),
    ];
    let first = graph.put(&vg, &no_refs(), batch.clone()).unwrap();
    let shape = (graph.version_count(), graph.edge_count());
    let second = graph.put(&vg, &no_refs(), batch).unwrap();

    assert_eq!(first, second);
    assert_eq!((graph.version_count(), graph.edge_count()), shape);
}

#[test]
fn test_edges_may_arrive_out_of_order() {
    let graph = VersionGraph::new("VG", no_gc());
    let head = graph
        .put(
            &peer("VG"),
            &no_refs(),
            vec![
                Edge::new("1", "2", created("c", "k", "v"), "1-2"),
                Edge::new("0", "1", created("b", "k", "v"), "0-1"),
                Edge::new("ROOT", "0", created("a", "k", "v"), "Root-0"),
            ],
        )
        .unwrap();
    assert_eq!(head, v("2"));
}

#[test]
fn test_unresolvable_gap_leaves_graph_untouched() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "0", created("a", "k", "v"), "Root-0")])
        .unwrap();

    let err = graph
        .put(
            &vg,
            &no_refs(),
            vec![
                Edge::new("0", "1", created("b", "k", "v"), "0-1"),
                Edge::new("missing", "2", created("c", "k", "v"), "m-2"),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::CannotAddEdges(_)));
    assert_eq!(graph.head(), v("0"));
    assert!(!graph.contains(&v("1")));
}

// ============================================================================
// Get
// ============================================================================

#[test]
fn test_get_simple() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "0", created("a", "k", "0"), "Root-0")])
        .unwrap();
    graph
        .put(&vg, &no_refs(), vec![Edge::new("0", "1", created("b", "k", "1"), "0-1")])
        .unwrap();

    let all = graph.get(&vg, &[v("ROOT")]).unwrap();
    assert_eq!(all.head, v("1"));
    assert_eq!(all.edges.len(), 2);
    assert_eq!(all.edges[0].key(), (v("ROOT"), v("0")));

    let tail = graph.get(&vg, &[v("0")]).unwrap();
    assert_eq!(tail.head, v("1"));
    assert_eq!(tail.edges.len(), 1);
    assert_eq!(tail.edges[0].key(), (v("0"), v("1")));
    assert_eq!(tail.remote_refs.get(&vg), Some(&v("1")));
}

#[test]
fn test_get_with_two_versions() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    graph
        .put(
            &vg,
            &no_refs(),
            vec![
                Edge::new("ROOT", "0", created("a", "k", "0"), "Root-0"),
                Edge::new("0", "1", created("b", "k", "1"), "0-1"),
                Edge::new("1", "2", created("c", "k", "2"), "1-2"),
            ],
        )
        .unwrap();

    let result = graph.get(&vg, &[v("ROOT"), v("1")]).unwrap();
    assert_eq!(result.head, v("2"));
    assert_eq!(result.edges.len(), 1);
    assert_eq!(result.edges[0].key(), (v("1"), v("2")));
}

#[test]
fn test_get_branched() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "0", created("tp1", "k", "0"), "Root-0")])
        .unwrap();
    let end = graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "1", created("tp2", "k", "1"), "Root-1")])
        .unwrap();

    assert_eq!(graph.get(&vg, &[v("ROOT")]).unwrap().edges.len(), 4);
    let partial = graph.get(&vg, &[v("0"), v("1")]).unwrap();
    assert_eq!(partial.head, end);
    let keys: BTreeSet<_> = partial.edges.iter().map(Edge::key).collect();
    assert_eq!(keys, BTreeSet::from([(v("0"), end.clone()), (v("1"), end)]));
}

#[test]
fn test_get_at_head_offers_nothing() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    graph
        .put(&vg, &no_refs(), vec![Edge::new("ROOT", "0", created("a", "k", "0"), "Root-0")])
        .unwrap();
    let result = graph.get(&peer("other"), &[v("0")]).unwrap();
    assert!(result.edges.is_empty());
    assert!(result.transaction_id.is_none());
    assert_eq!(graph.pending_offers(), 0);
}

#[test]
fn test_get_ignores_unknown_versions() {
    let graph = VersionGraph::new("VG", no_gc());
    graph
        .put(&peer("VG"), &no_refs(), vec![Edge::new("ROOT", "0", created("a", "k", "0"), "Root-0")])
        .unwrap();
    let result = graph.get(&peer("other"), &[v("never-seen")]).unwrap();
    assert_eq!(result.edges.len(), 1);
}

// ============================================================================
// Peer to peer
// ============================================================================

#[test]
fn test_p2p_merge_agrees_on_merge_id() {
    let (d0, d1, d2) = (
        created("tp1", "k", "R->0"),
        created("tp2", "k", "R->1"),
        created("tp3", "k", "M->2"),
    );
    let vg1 = VersionGraph::new("vg1", no_gc());
    let vg2 = VersionGraph::new("vg2", no_gc());
    let (p1, p2) = (peer("vg1"), peer("vg2"));

    vg1.put(&p1, &no_refs(), vec![Edge::new("ROOT", "0", d0.clone(), "Root-0")]).unwrap();
    let m1 = vg1.put(&p1, &no_refs(), vec![Edge::new("ROOT", "1", d1.clone(), "Root-1")]).unwrap();
    vg2.put(&p2, &no_refs(), vec![Edge::new("ROOT", "1", d1, "Root-1")]).unwrap();
    let m2 = vg2.put(&p2, &no_refs(), vec![Edge::new("ROOT", "0", d0, "Root-0")]).unwrap();
    assert_eq!(m1, m2);

    vg1.put(&p1, &no_refs(), vec![Edge::new(m1.clone(), "2", d2.clone(), "M(0,1)-2")]).unwrap();
    let result = vg1.get(&p2, &[v("0"), v("1")]).unwrap();
    assert_eq!(result.head, v("2"));
    assert_eq!(result.edges.len(), 3);

    let head = vg2.put(&p1, &result.remote_refs, result.edges).unwrap();
    assert_eq!(head, v("2"));
    assert_eq!(vg2.edge(&m2, &v("2")).unwrap().delta, d2);
    assert_eq!(vg2.version_count(), vg1.version_count());
}

#[test]
fn test_same_change_under_another_name_is_aliased() {
    let d0 = created("tp", "k", "v");
    let vg1 = VersionGraph::new("vg1", no_gc());
    let vg2 = VersionGraph::new("vg2", no_gc());
    let (p1, p2) = (peer("vg1"), peer("vg2"));

    vg1.put(&p1, &no_refs(), vec![Edge::new("ROOT", "a", d0.clone(), "e0")]).unwrap();
    vg2.put(&p2, &no_refs(), vec![Edge::new("ROOT", "b", d0, "e0")]).unwrap();

    let result = vg1.get(&p2, &[v("ROOT")]).unwrap();
    let head = vg2.put(&p1, &result.remote_refs, result.edges).unwrap();
    assert_eq!(head, v("b"));
    assert_eq!(vg2.resolve(&v("a")), v("b"));
    assert_eq!(vg2.version_count(), 2);

    // vg1 still calls that version "a".
    vg2.put(&p2, &no_refs(), vec![Edge::new("b", "c", created("tp2", "k", "v"), "e1")])
        .unwrap();
    let back = vg2.get(&p1, &[v("a")]).unwrap();
    assert_eq!(back.edges.len(), 1);
    assert_eq!(back.edges[0].key(), (v("a"), v("c")));
    assert_eq!(vg1.put(&p2, &back.remote_refs, back.edges).unwrap(), v("c"));
}

#[test]
fn test_end_to_end_counter() {
    let a = VersionGraph::new("A", no_gc());
    let b = VersionGraph::new("B", no_gc());
    let (pa, pb, pc) = (peer("A"), peer("B"), peer("C"));

    a.put(&pa, &no_refs(), vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")])
        .unwrap();

    let fetched = a.get(&pb, &[v("ROOT")]).unwrap();
    assert_eq!(fetched.head, v("V1"));
    assert_eq!(
        fetched.edges,
        vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")]
    );
    assert_eq!(b.put(&pa, &no_refs(), fetched.edges).unwrap(), v("V1"));

    let head = a
        .put(&pc, &no_refs(), vec![Edge::new("ROOT", "V2", count(Event::New, 2), "e2")])
        .unwrap();
    assert_eq!(head, VersionId::merge_of(&v("ROOT"), &v("V2"), &v("V1")));
    assert_eq!(
        a.read_dimension_at(&head, "Counter", "0", "count").unwrap(),
        Some(json!(2))
    );
    a.check_invariants().unwrap();
}

// ============================================================================
// Merge semantics
// ============================================================================

#[test]
fn test_lww_keeps_both_paths_consistent() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    graph.put(&vg, &no_refs(), vec![Edge::new("ROOT", "V", count(Event::New, 1), "e0")]).unwrap();
    graph.put(&vg, &no_refs(), vec![Edge::new("V", "A", count(Event::Modification, 2), "e1")]).unwrap();
    let merged = graph
        .put(&vg, &no_refs(), vec![Edge::new("V", "B", count(Event::Modification, 3), "e2")])
        .unwrap();

    // e2 > e1, so B is the current side.
    let schema = Schema::new();
    for side in ["A", "B"] {
        let mut state = graph.state_at(&v(side)).unwrap();
        let edge = graph.edge(&v(side), &merged).unwrap();
        state.apply(&schema, &edge.delta).unwrap();
        assert_eq!(
            state.object("Counter", "0").unwrap().get_dimension("count"),
            Some(&json!(3))
        );
    }
}

#[test]
fn test_impossible_pair_fails_without_mutation() {
    let graph = VersionGraph::new("VG", no_gc());
    let vg = peer("VG");
    graph.put(&vg, &no_refs(), vec![Edge::new("ROOT", "V", count(Event::New, 1), "e0")]).unwrap();
    graph.put(&vg, &no_refs(), vec![Edge::new("V", "A", count(Event::Modification, 2), "e1")]).unwrap();
    let shape = (graph.head(), graph.version_count(), graph.edge_count());

    // An object created on one branch and modified on the other.
    let err = graph
        .put(&vg, &no_refs(), vec![Edge::new("V", "B", count(Event::New, 3), "e2")])
        .unwrap_err();
    assert!(matches!(err, GraphError::Delta(_)));
    assert_eq!((graph.head(), graph.version_count(), graph.edge_count()), shape);
}

#[test]
fn test_custom_resolver_decides_merge() {
    let resolvers = ResolverRegistry::new().with("Counter", |_original, yours, theirs| {
        let (Some(yours), Some(theirs)) = (yours, theirs) else {
            return Err(ResolverError("both sides must exist".to_string()));
        };
        let sum = yours.get_dimension("count").and_then(|v| v.as_i64()).unwrap_or(0)
            + theirs.get_dimension("count").and_then(|v| v.as_i64()).unwrap_or(0);
        let mut merged = yours.clone();
        merged.set_dimension("count", json!(sum));
        Ok(Some(merged))
    });
    let graph = VersionGraph::with_resolvers("VG", no_gc(), Schema::new(), resolvers);
    let vg = peer("VG");
    graph.put(&vg, &no_refs(), vec![Edge::new("ROOT", "V", count(Event::New, 1), "e0")]).unwrap();
    graph.put(&vg, &no_refs(), vec![Edge::new("V", "A", count(Event::Modification, 2), "e1")]).unwrap();
    let merged = graph
        .put(&vg, &no_refs(), vec![Edge::new("V", "B", count(Event::Modification, 3), "e2")])
        .unwrap();

    assert_eq!(
        graph.read_dimension_at(&merged, "Counter", "0", "count").unwrap(),
        Some(json!(5))
    );
}

#[test]
fn test_failing_resolver_leaves_graph_untouched() {
    let resolvers = ResolverRegistry::new()
        .with("Counter", |_, _, _| Err(ResolverError("refusing to merge".to_string())));
    let graph = VersionGraph::with_resolvers("VG", no_gc(), Schema::new(), resolvers);
    let vg = peer("VG");
    graph.put(&vg, &no_refs(), vec![Edge::new("ROOT", "V", count(Event::New, 1), "e0")]).unwrap();
    graph.put(&vg, &no_refs(), vec![Edge::new("V", "A", count(Event::Modification, 2), "e1")]).unwrap();

    let err = graph
        .put(&vg, &no_refs(), vec![Edge::new("V", "B", count(Event::Modification, 3), "e2")])
        .unwrap_err();
    assert!(err.to_string().contains("refusing to merge"));
    assert_eq!(graph.head(), v("A"));
    assert!(!graph.contains(&v("B")));
}

// ============================================================================
// Confirmation bookkeeping
// ============================================================================

#[test]
fn test_confirmation_moves_reference() {
    let graph = VersionGraph::new("A", no_gc());
    let (pa, pb) = (peer("A"), peer("B"));
    graph.put(&pa, &no_refs(), vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")]).unwrap();

    let offer = graph.get(&pb, &[v("ROOT")]).unwrap();
    let txid = offer.transaction_id.clone().unwrap();
    assert_eq!(graph.pending_offers(), 1);
    assert!(matches!(
        graph.confirm(&pb, &TransactionId::from("bogus")),
        Err(GraphError::UnknownTransaction(_))
    ));

    assert_eq!(graph.confirm(&pb, &txid).unwrap(), v("V1"));
    assert_eq!(graph.reference(&pb), Some(v("V1")));
    assert_eq!(graph.pending_offers(), 0);

    let again = graph.get(&pb, &[v("ROOT")]).unwrap();
    assert!(graph.abandon(&again.transaction_id.unwrap()));
    assert_eq!(graph.pending_offers(), 0);
}

#[test]
fn test_put_records_origin_reference() {
    let graph = VersionGraph::new("A", no_gc());
    let pb = peer("B");
    let refs = BTreeMap::from([(pb.clone(), v("V2")), (peer("C"), v("elsewhere"))]);
    graph
        .put(
            &pb,
            &refs,
            vec![
                Edge::new("ROOT", "V1", count(Event::New, 1), "e1"),
                Edge::new("V1", "V2", count(Event::Modification, 2), "e2"),
            ],
        )
        .unwrap();
    assert_eq!(graph.declared(&pb), BTreeMap::from([(pb.clone(), v("V2"))]));
    assert_eq!(graph.known_by(&pb), vec![v("V2")]);
    assert_eq!(graph.reference(&pb), None);
    assert!(graph.known_by(&peer("C")).is_empty());

    graph.acknowledge(&pb, TransactionId::from("t1"));
    assert_eq!(graph.drain_confirmed(&pb), vec![TransactionId::from("t1")]);
    assert!(graph.drain_confirmed(&pb).is_empty());
}

#[test]
fn test_checkout_path_pins_head() {
    let graph = VersionGraph::new("A", GraphConfig::default());
    let local = peer("A");
    graph
        .put(
            &local,
            &BTreeMap::from([(local.clone(), v("V1"))]),
            vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")],
        )
        .unwrap();
    graph
        .put(&peer("B"), &no_refs(), vec![Edge::new("V1", "V2", count(Event::Modification, 2), "e2")])
        .unwrap();

    let (path, head) = graph.checkout_path(&local, &v("V1")).unwrap();
    assert_eq!(head, v("V2"));
    assert_eq!(path.len(), 1);
    assert_eq!(graph.reference(&local), Some(v("V2")));
    assert!(matches!(
        graph.confirm_local(&local, &v("nope")),
        Err(GraphError::UnknownVersion(_))
    ));
}

#[test]
fn test_put_without_refs_declares_last_target() {
    let graph = VersionGraph::new("A", no_gc());
    let pb = peer("B");
    graph
        .put(&pb, &no_refs(), vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")])
        .unwrap();
    assert_eq!(graph.known_by(&pb), vec![v("V1")]);
}

#[test]
fn test_get_declares_local_heaps() {
    let graph = VersionGraph::new("A", no_gc());
    let heap = peer("A-heap");
    graph
        .put(&heap, &no_refs(), vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")])
        .unwrap();
    graph.checkout_path(&heap, &VersionId::root()).unwrap();
    graph
        .put(&peer("C"), &no_refs(), vec![Edge::new("V1", "V2", count(Event::Modification, 2), "e2")])
        .unwrap();

    let result = graph.get(&peer("B"), &[]).unwrap();
    assert_eq!(
        result.remote_refs,
        BTreeMap::from([(peer("A"), v("V2")), (heap, v("V1"))])
    );
}

#[test]
fn test_get_stops_at_ancestors_of_known() {
    let graph = VersionGraph::new("A", no_gc());
    let pa = peer("A");
    graph
        .put(
            &pa,
            &no_refs(),
            vec![
                Edge::new("ROOT", "V1", count(Event::New, 1), "e1"),
                Edge::new("V1", "V2", count(Event::Modification, 2), "e2"),
                Edge::new("V2", "V3", count(Event::Modification, 3), "e3"),
            ],
        )
        .unwrap();

    let result = graph.get(&peer("B"), &[v("ROOT"), v("V2")]).unwrap();
    assert_eq!(result.edges.len(), 1);
    assert_eq!(result.edges[0].key(), (v("V2"), v("V3")));
}

// ============================================================================
// Garbage collection
// ============================================================================

fn materialize(graph: &VersionGraph, from: &VersionId) -> State {
    let schema = Schema::new();
    let mut state = graph.state_at(from).unwrap();
    let path = graph.path_to_head(from).unwrap();
    let cumulative = compose_all(&schema, path.iter().map(|e| &e.delta)).unwrap();
    state.apply(&schema, &cumulative).unwrap();
    state
}

#[test]
fn test_gc_preserves_answerability() {
    let graph = VersionGraph::new("A", no_gc());
    let (pa, pb) = (peer("A"), peer("B"));
    let mut edges = vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")];
    for i in 2..=6 {
        edges.push(Edge::new(
            format!("V{}", i - 1),
            format!("V{}", i),
            count(Event::Modification, i),
            format!("e{}", i),
        ));
    }
    graph.put(&pa, &no_refs(), edges).unwrap();
    graph.confirm_local(&pb, &v("V3")).unwrap();

    let before = materialize(&graph, &v("V3"));
    let stats = graph.garbage_collect().unwrap();
    assert!(stats.versions_removed > 0);
    assert!(graph.contains(&v("V3")));
    assert_eq!(materialize(&graph, &v("V3")), before);
    assert_eq!(graph.state_at(&graph.head()).unwrap(), before);

    let roots = graph.roots();
    assert_eq!(roots, vec![VersionId::root()]);
    assert_eq!(graph.heads(), vec![v("V6")]);
}

#[test]
fn test_gc_prunes_unreferenced_merge_sides() {
    let graph = VersionGraph::new("A", no_gc());
    let vg = peer("A");
    graph.put(&vg, &no_refs(), vec![Edge::new("ROOT", "X", created("a", "k", "1"), "e1")]).unwrap();
    graph.put(&vg, &no_refs(), vec![Edge::new("ROOT", "Y", created("b", "k", "2"), "e2")]).unwrap();
    let merged = graph.head();

    // While Y is still declared, the X side sits above it and stays.
    graph.garbage_collect().unwrap();
    assert!(graph.contains(&v("X")));

    let refs = BTreeMap::from([(vg.clone(), v("Z"))]);
    graph.put(&vg, &refs, vec![Edge::new(merged, "Z", created("c", "k", "3"), "e3")]).unwrap();
    let state = graph.state_at(&v("Z")).unwrap();

    graph.garbage_collect().unwrap();
    assert_eq!(graph.state_at(&v("Z")).unwrap(), state);
    assert_eq!(graph.version_count(), 2);
    assert!(!graph.contains(&v("X")));
    graph.check_invariants().unwrap();
}

#[test]
fn test_auto_gc_keeps_pending_offer() {
    let graph = VersionGraph::new("A", GraphConfig::default());
    let (pa, pb) = (peer("A"), peer("B"));
    graph.put(&pa, &no_refs(), vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")]).unwrap();
    let offer = graph.get(&pb, &[v("ROOT")]).unwrap();
    graph
        .put(&pa, &no_refs(), vec![Edge::new("V1", "V2", count(Event::Modification, 2), "e2")])
        .unwrap();
    graph
        .put(&pa, &no_refs(), vec![Edge::new("V2", "V3", count(Event::Modification, 3), "e3")])
        .unwrap();

    assert!(graph.contains(&v("V1")));
    graph.confirm(&pb, &offer.transaction_id.unwrap()).unwrap();
    let next = graph.get(&pb, &[v("V1")]).unwrap();
    assert_eq!(next.head, v("V3"));
    graph.check_invariants().unwrap();
}

// ============================================================================
// Change notification
// ============================================================================

#[test]
fn test_wait_for_change_times_out() {
    let graph = VersionGraph::new("A", GraphConfig::default());
    let timeout = Duration::from_millis(50);
    let started = Instant::now();
    let err = graph.wait_for_change(&[VersionId::root()], timeout).unwrap_err();
    assert!(matches!(err, GraphError::Timeout(_)));
    assert!(started.elapsed() >= timeout);
    assert_eq!(graph.head(), VersionId::root());
}

#[test]
fn test_wait_for_change_wakes_on_put() {
    let graph = Arc::new(VersionGraph::new("A", GraphConfig::default()));
    let writer = Arc::clone(&graph);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        writer
            .put(&peer("B"), &no_refs(), vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")])
            .unwrap();
    });

    graph
        .wait_for_change(&[VersionId::root()], Duration::from_secs(5))
        .unwrap();
    assert_eq!(graph.head(), v("V1"));
    handle.join().unwrap();
}

#[test]
fn test_wait_returns_immediately_when_behind() {
    let graph = VersionGraph::new("A", GraphConfig::default());
    graph
        .put(&peer("B"), &no_refs(), vec![Edge::new("ROOT", "V1", count(Event::New, 1), "e1")])
        .unwrap();
    graph
        .wait_for_change(&[VersionId::root()], Duration::from_millis(1))
        .unwrap();
}
