//! # Property-Based Tests
//!
//! Invariants of the store, traversal and scoring layers checked over
//! generated graphs and inputs.

use graphloom_core::merge::merge_weights;
use graphloom_core::{
    Direction, GraphStore, MemoryGraph, NewEdge, NewNode, NodeId, SimpleEmbeddingProvider,
    TraversalEngine, cosine_similarity,
};
use proptest::collection::vec;
use proptest::prelude::*;

/// Build a graph of `size` nodes and the given `(from, to)` edges,
/// taken modulo `size`.
fn build_graph(size: usize, pairs: &[(usize, usize)]) -> (MemoryGraph, Vec<NodeId>) {
    let mut graph = MemoryGraph::new();
    let ids: Vec<NodeId> = (0..size)
        .map(|i| {
            graph
                .create_node(NewNode::new("T", format!("n{i}")))
                .expect("node")
                .id
        })
        .collect();
    for &(from, to) in pairs {
        graph
            .create_edge(NewEdge::new(ids[from % size], ids[to % size], "link"))
            .expect("edge");
    }
    (graph, ids)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// A created node reads back with the same content and ordered timestamps.
    #[test]
    fn created_node_reads_back(
        node_type in "[A-Za-z]{1,12}",
        label in ".{0,24}",
        props in vec(("[a-z]{1,6}", any::<i64>()), 0..6),
    ) {
        let mut draft = NewNode::new(node_type, label);
        for (key, value) in props {
            draft = draft.with_property(key, value);
        }

        let mut graph = MemoryGraph::new();
        let created = graph.create_node(draft.clone()).expect("create");
        let stored = graph.get_node(created.id).expect("get").expect("exists");

        prop_assert_eq!(&stored.node_type, &draft.node_type);
        prop_assert_eq!(&stored.label, &draft.label);
        prop_assert_eq!(&stored.properties, &draft.properties);
        prop_assert!(stored.updated_at >= stored.created_at);
    }

    /// Deleting a node removes exactly the edges that touch it.
    #[test]
    fn delete_cascades_exactly(
        size in 2usize..12,
        pairs in vec((0usize..12, 0usize..12), 0..40),
        victim in 0usize..12,
    ) {
        let (mut graph, ids) = build_graph(size, &pairs);
        let victim = ids[victim % size];

        let touching = graph.outgoing_edges(victim).expect("out").len()
            + graph.incoming_edges(victim).expect("in").len()
            - graph
                .outgoing_edges(victim)
                .expect("out")
                .iter()
                .filter(|e| e.target_id == victim)
                .count();
        let before = graph.edge_count().expect("count");

        let deleted = graph.delete_node(victim).expect("delete").expect("existed");
        prop_assert_eq!(deleted.deleted_edge_count, touching);
        prop_assert_eq!(graph.edge_count().expect("count"), before - touching);
        prop_assert!(graph.outgoing_edges(victim).expect("out").is_empty());
        prop_assert!(graph.incoming_edges(victim).expect("in").is_empty());
    }

    /// `Both` neighbors are the in-neighbors plus the out-neighbors.
    #[test]
    fn both_is_in_plus_out(
        size in 1usize..10,
        pairs in vec((0usize..10, 0usize..10), 0..30),
        pick in 0usize..10,
    ) {
        let (graph, ids) = build_graph(size, &pairs);
        let engine = TraversalEngine::new(&graph);
        let node = ids[pick % size];

        let incoming = engine.neighbors(node, Direction::In).expect("in").len();
        let outgoing = engine.neighbors(node, Direction::Out).expect("out").len();
        let both = engine.neighbors(node, Direction::Both).expect("both").len();
        prop_assert_eq!(both, incoming + outgoing);
    }

    /// Paths never exceed `max_depth` nodes and always follow out-edges.
    #[test]
    fn paths_respect_depth_and_direction(
        size in 2usize..10,
        pairs in vec((0usize..10, 0usize..10), 0..30),
        from in 0usize..10,
        to in 0usize..10,
        max_depth in 1usize..6,
    ) {
        let (graph, ids) = build_graph(size, &pairs);
        let engine = TraversalEngine::new(&graph);
        let (from, to) = (ids[from % size], ids[to % size]);

        if let Some(path) = engine.find_path(from, to, max_depth).expect("path") {
            prop_assert!(path.len() <= max_depth);
            prop_assert_eq!(path.first().map(|n| n.id), Some(from));
            prop_assert_eq!(path.last().map(|n| n.id), Some(to));
            for hop in path.windows(2) {
                let linked = graph
                    .outgoing_edges(hop[0].id)
                    .expect("out")
                    .iter()
                    .any(|e| e.target_id == hop[1].id);
                prop_assert!(linked);
            }
        }
    }

    /// A node always reaches itself in a single-node path.
    #[test]
    fn path_to_self_is_single_node(
        size in 1usize..8,
        pairs in vec((0usize..8, 0usize..8), 0..20),
        start in 0usize..8,
        max_depth in 1usize..50,
    ) {
        let (graph, ids) = build_graph(size, &pairs);
        let start = ids[start % size];
        let path = TraversalEngine::new(&graph)
            .find_path(start, start, max_depth)
            .expect("path")
            .expect("found");
        prop_assert_eq!(path.len(), 1);
        prop_assert_eq!(path[0].id, start);
    }

    /// Depth zero yields only the center and no edges.
    #[test]
    fn depth_zero_subgraph_is_center_only(
        size in 1usize..8,
        pairs in vec((0usize..8, 0usize..8), 0..20),
        center in 0usize..8,
    ) {
        let (graph, ids) = build_graph(size, &pairs);
        let center = ids[center % size];
        let subgraph = TraversalEngine::new(&graph)
            .subgraph(&[center], 0, None)
            .expect("subgraph");
        prop_assert_eq!(subgraph.nodes.len(), 1);
        prop_assert_eq!(subgraph.nodes[0].id, center);
        prop_assert!(subgraph.edges.is_empty());
    }

    /// Cosine of a non-zero vector with itself is one.
    #[test]
    fn cosine_self_is_one(v in vec(-100.0f32..100.0, 1..64)) {
        prop_assume!(v.iter().any(|x| x.abs() > 1e-3));
        prop_assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    /// Vectors of different lengths score zero.
    #[test]
    fn cosine_length_mismatch_is_zero(
        a in vec(-1.0f32..1.0, 1..16),
        extra in 1usize..4,
    ) {
        let mut b = a.clone();
        b.extend(std::iter::repeat_n(0.5, extra));
        prop_assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    /// The deterministic backend is bit-stable.
    #[test]
    fn simple_embedding_is_deterministic(text in ".{0,80}") {
        let provider = SimpleEmbeddingProvider::new();
        let first = provider.embed(&text);
        let second = provider.embed(&text);
        prop_assert!(first.iter().zip(&second).all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    /// Text sharing words with a query scores strictly higher than text
    /// drawn from a disjoint alphabet.
    #[test]
    fn lexical_overlap_beats_disjoint_text(
        shared in vec("[a-h]{4,8}", 2..5),
        extra in "[a-h]{4,8}",
        foreign in vec("[q-z]{4,8}", 3..6),
    ) {
        let provider = SimpleEmbeddingProvider::new();
        let query = shared.join(" ");
        let overlapping = format!("{query} {extra}");
        let disjoint = foreign.join(" ");

        let base = provider.embed(&query);
        let close = cosine_similarity(&base, &provider.embed(&overlapping));
        let far = cosine_similarity(&base, &provider.embed(&disjoint));
        prop_assert!(close > far, "close={} far={}", close, far);
    }

    /// Merged weight is the mean, or the single defined side.
    #[test]
    fn merged_weight_rules(a in -10.0f64..10.0, b in -10.0f64..10.0) {
        let both = merge_weights(Some(a), Some(b)).expect("defined");
        prop_assert!((both - (a + b) / 2.0).abs() < 1e-12);
        prop_assert_eq!(merge_weights(Some(a), None), Some(a));
        prop_assert_eq!(merge_weights(None, Some(b)), Some(b));
    }
}
