//! # Traversal Engine
//!
//! Read-only graph queries over any `GraphStore`: neighbor listing,
//! breadth-first shortest path and bounded subgraph extraction.
//!
//! Both BFS routines mark nodes visited when they are dequeued, not when
//! they are enqueued. A node may therefore sit in the frontier more than
//! once; the first dequeue wins and later copies are dropped.

use crate::graph::GraphStore;
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::{Direction, Edge, EdgeId, LoomError, Neighbor, Node, NodeId, Subgraph};
use std::collections::{BTreeSet, VecDeque};

/// Graph queries borrowing a store for the duration of the call.
pub struct TraversalEngine<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> TraversalEngine<'a> {
    #[must_use]
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Neighbors of `id` in the given direction.
    ///
    /// `Both` is the in-results followed by the out-results, so a self-loop
    /// appears twice.
    pub fn neighbors(&self, id: NodeId, direction: Direction) -> Result<Vec<Neighbor>, LoomError> {
        match direction {
            Direction::In => self.pair_with_nodes(self.store.incoming_edges(id)?, Direction::In),
            Direction::Out => self.pair_with_nodes(self.store.outgoing_edges(id)?, Direction::Out),
            Direction::Both => {
                let mut all = self.neighbors(id, Direction::In)?;
                all.extend(self.neighbors(id, Direction::Out)?);
                Ok(all)
            }
        }
    }

    fn pair_with_nodes(
        &self,
        edges: Vec<Edge>,
        direction: Direction,
    ) -> Result<Vec<Neighbor>, LoomError> {
        let mut neighbors = Vec::with_capacity(edges.len());
        for edge in edges {
            let other = match direction {
                Direction::In => edge.source_id,
                _ => edge.target_id,
            };
            match self.store.get_node(other)? {
                Some(node) => neighbors.push(Neighbor {
                    edge,
                    node,
                    direction,
                }),
                None => tracing::warn!(edge = %edge.id, node = %other, "edge endpoint missing"),
            }
        }
        Ok(neighbors)
    }

    /// Shortest directed path from `from` to `to` following out-edges.
    ///
    /// The returned path has at most `max_depth` nodes. `max_depth` is
    /// clamped to `MAX_TRAVERSAL_DEPTH`.
    pub fn find_path(
        &self,
        from: NodeId,
        to: NodeId,
        max_depth: usize,
    ) -> Result<Option<Vec<Node>>, LoomError> {
        let max_depth = max_depth.min(MAX_TRAVERSAL_DEPTH);
        if !self.store.contains_node(from)? {
            return Ok(None);
        }

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((from, vec![from]));

        while let Some((current, path)) = queue.pop_front() {
            if current == to {
                return self.resolve_path(&path);
            }
            if path.len() >= max_depth || !visited.insert(current) {
                continue;
            }

            for edge in self.store.outgoing_edges(current)? {
                if !visited.contains(&edge.target_id) {
                    let mut extended = path.clone();
                    extended.push(edge.target_id);
                    queue.push_back((edge.target_id, extended));
                }
            }
        }

        Ok(None)
    }

    fn resolve_path(&self, path: &[NodeId]) -> Result<Option<Vec<Node>>, LoomError> {
        let mut nodes = Vec::with_capacity(path.len());
        for &id in path {
            match self.store.get_node(id)? {
                Some(node) => nodes.push(node),
                None => return Err(LoomError::NodeNotFound(id)),
            }
        }
        Ok(Some(nodes))
    }

    /// Every node within `depth` hops of any center (edges in either
    /// direction), plus the edges walked to reach them.
    ///
    /// When `edge_types` is given, only edges of those types are walked.
    /// Centers that do not exist are skipped.
    pub fn subgraph(
        &self,
        centers: &[NodeId],
        depth: usize,
        edge_types: Option<&[&str]>,
    ) -> Result<Subgraph, LoomError> {
        if centers.is_empty() {
            return Err(LoomError::MalformedInput(
                "subgraph requires at least one center node".to_string(),
            ));
        }
        let depth = depth.min(MAX_TRAVERSAL_DEPTH);

        let mut visited = BTreeSet::new();
        let mut seen_edges: BTreeSet<EdgeId> = BTreeSet::new();
        let mut result = Subgraph::default();
        let mut queue: VecDeque<(NodeId, usize)> = centers.iter().map(|&c| (c, 0)).collect();

        while let Some((current, level)) = queue.pop_front() {
            if level > depth || visited.contains(&current) {
                continue;
            }
            visited.insert(current);

            let Some(node) = self.store.get_node(current)? else {
                tracing::debug!(node = %current, "subgraph center not found");
                continue;
            };
            result.nodes.push(node);

            if level >= depth {
                continue;
            }

            for neighbor in self.neighbors(current, Direction::Both)? {
                if edge_types.is_some_and(|types| !types.contains(&neighbor.edge.edge_type.as_str()))
                {
                    continue;
                }
                let next = neighbor.node.id;
                if seen_edges.insert(neighbor.edge.id) {
                    result.edges.push(neighbor.edge);
                }
                if !visited.contains(&next) {
                    queue.push_back((next, level + 1));
                }
            }
        }

        Ok(result)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::{NewEdge, NewNode};

    /// a -> b -> c -> d with a self-loop on b.
    fn chain() -> (MemoryGraph, Vec<NodeId>) {
        let mut graph = MemoryGraph::new();
        let ids: Vec<NodeId> = ["a", "b", "c", "d"]
            .iter()
            .map(|label| {
                graph
                    .create_node(NewNode::new("T", *label))
                    .expect("node")
                    .id
            })
            .collect();
        graph.create_edge(NewEdge::new(ids[0], ids[1], "next")).expect("edge");
        graph.create_edge(NewEdge::new(ids[1], ids[2], "next")).expect("edge");
        graph.create_edge(NewEdge::new(ids[2], ids[3], "next")).expect("edge");
        graph.create_edge(NewEdge::new(ids[1], ids[1], "loop")).expect("edge");
        (graph, ids)
    }

    fn labels(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.label.as_str()).collect()
    }

    #[test]
    fn neighbors_both_is_in_then_out() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);

        let incoming = engine.neighbors(ids[1], Direction::In).expect("in");
        let outgoing = engine.neighbors(ids[1], Direction::Out).expect("out");
        let both = engine.neighbors(ids[1], Direction::Both).expect("both");

        // a->b and b->b in; b->c and b->b out.
        assert_eq!(incoming.len(), 2);
        assert_eq!(outgoing.len(), 2);
        assert_eq!(both.len(), incoming.len() + outgoing.len());
        assert!(both[..2].iter().all(|n| n.direction == Direction::In));
        assert!(both[2..].iter().all(|n| n.direction == Direction::Out));
    }

    #[test]
    fn in_neighbors_pair_with_source() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);
        let incoming = engine.neighbors(ids[2], Direction::In).expect("in");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].node.id, ids[1]);
    }

    #[test]
    fn path_to_self_is_single_node() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);
        let path = engine.find_path(ids[0], ids[0], 1).expect("path").expect("found");
        assert_eq!(labels(&path), vec!["a"]);
    }

    #[test]
    fn path_follows_out_edges_only() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);

        let path = engine.find_path(ids[0], ids[3], 10).expect("path").expect("found");
        assert_eq!(labels(&path), vec!["a", "b", "c", "d"]);

        assert!(engine.find_path(ids[3], ids[0], 10).expect("path").is_none());
    }

    #[test]
    fn path_respects_max_depth() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);

        assert!(engine.find_path(ids[0], ids[3], 3).expect("path").is_none());
        let path = engine.find_path(ids[0], ids[3], 4).expect("path").expect("found");
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn path_prefers_shortest_route() {
        let (mut graph, ids) = chain();
        graph
            .create_edge(NewEdge::new(ids[0], ids[3], "shortcut"))
            .expect("edge");
        let engine = TraversalEngine::new(&graph);
        let path = engine.find_path(ids[0], ids[3], 10).expect("path").expect("found");
        assert_eq!(labels(&path), vec!["a", "d"]);
    }

    #[test]
    fn path_from_missing_node_is_none() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);
        assert!(engine.find_path(NodeId(999), ids[0], 5).expect("path").is_none());
    }

    #[test]
    fn subgraph_depth_zero_is_centers_only() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);
        let sub = engine.subgraph(&[ids[1]], 0, None).expect("subgraph");
        assert_eq!(labels(&sub.nodes), vec!["b"]);
        assert!(sub.edges.is_empty());
    }

    #[test]
    fn subgraph_walks_both_directions_and_dedups_edges() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);
        let sub = engine.subgraph(&[ids[1]], 1, None).expect("subgraph");

        let mut found = labels(&sub.nodes);
        found.sort_unstable();
        assert_eq!(found, vec!["a", "b", "c"]);

        // a->b, b->b (seen twice, kept once), b->c
        assert_eq!(sub.edges.len(), 3);
    }

    #[test]
    fn subgraph_filters_edge_types() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);
        let sub = engine
            .subgraph(&[ids[1]], 2, Some(&["loop"][..]))
            .expect("subgraph");
        assert_eq!(labels(&sub.nodes), vec!["b"]);
        assert_eq!(sub.edges.len(), 1);
        assert_eq!(sub.edges[0].edge_type, "loop");
    }

    #[test]
    fn subgraph_with_multiple_centers() {
        let (graph, ids) = chain();
        let engine = TraversalEngine::new(&graph);
        let sub = engine.subgraph(&[ids[0], ids[3]], 0, None).expect("subgraph");
        assert_eq!(labels(&sub.nodes), vec!["a", "d"]);
    }

    #[test]
    fn subgraph_requires_centers() {
        let (graph, _) = chain();
        let engine = TraversalEngine::new(&graph);
        assert!(matches!(
            engine.subgraph(&[], 1, None),
            Err(LoomError::MalformedInput(_))
        ));
    }
}
