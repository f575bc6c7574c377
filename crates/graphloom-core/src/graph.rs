//! # Graph Store
//!
//! The `GraphStore` trait is the persistence contract every backend honors,
//! and `MemoryGraph` is the volatile implementation of it.
//!
//! Contract highlights:
//! - Ids come from monotonic counters and are never reused.
//! - Every write stamps `updated_at`; creates stamp `created_at` too.
//! - Edge writes fail with `LoomError::ReferentialIntegrity` when either
//!   endpoint is missing; bulk writes are all-or-nothing.
//! - Reads, updates and deletes of a missing id return `None`.
//! - Queries filter, then order newest first, then paginate.

use crate::types::validate_batch_len;
use crate::{
    DeletedNode, Edge, EdgeEnd, EdgeFilter, EdgeId, EdgePatch, LoomError, NewEdge, NewNode, Node,
    NodeEmbedding, NodeFilter, NodeId, NodePatch,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// GRAPHSTORE TRAIT
// =============================================================================

/// Durable or volatile storage for nodes, edges and cached embeddings.
///
/// All fallible operations return `Result<T, LoomError>` so that in-memory
/// and persistent backends can be used interchangeably.
pub trait GraphStore {
    /// Create a node with a fresh id.
    fn create_node(&mut self, draft: NewNode) -> Result<Node, LoomError>;

    /// Create many nodes in one batch. Either all are written or none.
    fn create_nodes(&mut self, drafts: Vec<NewNode>) -> Result<Vec<Node>, LoomError>;

    fn get_node(&self, id: NodeId) -> Result<Option<Node>, LoomError>;

    fn contains_node(&self, id: NodeId) -> Result<bool, LoomError>;

    fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, LoomError>;

    /// Patch label and/or properties. Returns `None` if the node is missing.
    fn update_node(&mut self, id: NodeId, patch: NodePatch) -> Result<Option<Node>, LoomError>;

    /// Overwrite type, label and properties wholesale, keeping id and
    /// `created_at`. Used by the `update` merge strategy.
    fn replace_node(&mut self, id: NodeId, draft: NewNode) -> Result<Option<Node>, LoomError>;

    /// Delete every edge touching the node, its cached embedding, then the
    /// node itself.
    fn delete_node(&mut self, id: NodeId) -> Result<Option<DeletedNode>, LoomError>;

    /// Create an edge with a fresh id. Both endpoints must exist.
    fn create_edge(&mut self, draft: NewEdge) -> Result<Edge, LoomError>;

    /// Create many edges in one batch. Either all are written or none.
    fn create_edges(&mut self, drafts: Vec<NewEdge>) -> Result<Vec<Edge>, LoomError>;

    fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>, LoomError>;

    fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, LoomError>;

    /// Patch type, properties and/or weight. Returns `None` if missing.
    fn update_edge(&mut self, id: EdgeId, patch: EdgePatch) -> Result<Option<Edge>, LoomError>;

    /// Delete one edge. No cascade. Returns the removed edge.
    fn delete_edge(&mut self, id: EdgeId) -> Result<Option<Edge>, LoomError>;

    /// Edges whose source is `id`, oldest first.
    fn outgoing_edges(&self, id: NodeId) -> Result<Vec<Edge>, LoomError>;

    /// Edges whose target is `id`, oldest first.
    fn incoming_edges(&self, id: NodeId) -> Result<Vec<Edge>, LoomError>;

    /// Cache an embedding for a node, replacing any previous one.
    /// Returns `false` if the node does not exist.
    fn put_embedding(&mut self, id: NodeId, embedding: NodeEmbedding) -> Result<bool, LoomError>;

    fn embedding_for(&self, id: NodeId) -> Result<Option<NodeEmbedding>, LoomError>;

    /// Every cached embedding, ordered by node id.
    fn embeddings(&self) -> Result<Vec<(NodeId, NodeEmbedding)>, LoomError>;

    fn node_count(&self) -> Result<usize, LoomError>;

    fn edge_count(&self) -> Result<usize, LoomError>;
}

// =============================================================================
// SHARED HELPERS (used by every backend)
// =============================================================================

/// Timestamp for a write. Never earlier than `floor`, so `updated_at`
/// cannot run behind `created_at` under clock adjustments.
pub(crate) fn write_time(floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match floor {
        Some(floor) if floor > now => floor,
        _ => now,
    }
}

/// Apply the label/type predicates, order newest first, then paginate.
pub(crate) fn finish_node_query(mut nodes: Vec<Node>, filter: &NodeFilter) -> Vec<Node> {
    nodes.retain(|n| {
        filter.node_type.as_deref().is_none_or(|t| n.node_type == t)
            && filter.label.as_deref().is_none_or(|l| n.label.contains(l))
    });
    nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    paginate(nodes, filter.offset, filter.limit)
}

/// Apply the source/target/type predicates, order newest first, then paginate.
pub(crate) fn finish_edge_query(mut edges: Vec<Edge>, filter: &EdgeFilter) -> Vec<Edge> {
    edges.retain(|e| {
        filter.source_id.is_none_or(|s| e.source_id == s)
            && filter.target_id.is_none_or(|t| e.target_id == t)
            && filter.edge_type.as_deref().is_none_or(|t| e.edge_type == t)
    });
    edges.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    paginate(edges, filter.offset, filter.limit)
}

fn paginate<T>(items: Vec<T>, offset: Option<usize>, limit: Option<usize>) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

pub(crate) fn build_node(id: NodeId, draft: NewNode, at: DateTime<Utc>) -> Node {
    Node {
        id,
        node_type: draft.node_type,
        label: draft.label,
        properties: draft.properties,
        created_at: at,
        updated_at: at,
    }
}

pub(crate) fn build_edge(id: EdgeId, draft: NewEdge, at: DateTime<Utc>) -> Edge {
    Edge {
        id,
        source_id: draft.source_id,
        target_id: draft.target_id,
        edge_type: draft.edge_type,
        properties: draft.properties,
        weight: draft.weight,
        created_at: at,
        updated_at: at,
    }
}

pub(crate) fn apply_node_patch(node: &mut Node, patch: NodePatch) {
    if let Some(label) = patch.label {
        node.label = label;
    }
    if let Some(properties) = patch.properties {
        node.properties = properties;
    }
    node.updated_at = write_time(Some(node.created_at));
}

pub(crate) fn apply_edge_patch(edge: &mut Edge, patch: EdgePatch) {
    if let Some(edge_type) = patch.edge_type {
        edge.edge_type = edge_type;
    }
    if let Some(properties) = patch.properties {
        edge.properties = properties;
    }
    if let Some(weight) = patch.weight {
        edge.weight = weight;
    }
    edge.updated_at = write_time(Some(edge.created_at));
}

// =============================================================================
// MEMORY GRAPH
// =============================================================================

/// Volatile graph store.
///
/// Uses `BTreeMap` throughout so iteration order is deterministic.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    /// source -> edges leaving it
    outgoing: BTreeMap<NodeId, BTreeSet<EdgeId>>,
    /// target -> edges entering it
    incoming: BTreeMap<NodeId, BTreeSet<EdgeId>>,
    embeddings: BTreeMap<NodeId, NodeEmbedding>,
    next_node_id: u64,
    next_edge_id: u64,
}

impl MemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        id
    }

    fn allocate_edge_id(&mut self) -> EdgeId {
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id = self.next_edge_id.saturating_add(1);
        id
    }

    fn check_endpoints(&self, draft: &NewEdge) -> Result<(), LoomError> {
        if !self.nodes.contains_key(&draft.source_id) {
            return Err(LoomError::ReferentialIntegrity {
                end: EdgeEnd::Source,
                node: draft.source_id,
            });
        }
        if !self.nodes.contains_key(&draft.target_id) {
            return Err(LoomError::ReferentialIntegrity {
                end: EdgeEnd::Target,
                node: draft.target_id,
            });
        }
        Ok(())
    }

    fn insert_edge_record(&mut self, edge: Edge) {
        self.outgoing
            .entry(edge.source_id)
            .or_default()
            .insert(edge.id);
        self.incoming
            .entry(edge.target_id)
            .or_default()
            .insert(edge.id);
        self.edges.insert(edge.id, edge);
    }

    fn remove_edge_record(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(&id)?;
        if let Some(out) = self.outgoing.get_mut(&edge.source_id) {
            out.remove(&id);
        }
        if let Some(inc) = self.incoming.get_mut(&edge.target_id) {
            inc.remove(&id);
        }
        Some(edge)
    }

    fn collect_edges(&self, ids: Option<&BTreeSet<EdgeId>>) -> Vec<Edge> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id).cloned())
            .collect()
    }
}

impl GraphStore for MemoryGraph {
    fn create_node(&mut self, draft: NewNode) -> Result<Node, LoomError> {
        draft.validate()?;
        let id = self.allocate_node_id();
        let node = build_node(id, draft, write_time(None));
        self.nodes.insert(id, node.clone());
        Ok(node)
    }

    fn create_nodes(&mut self, drafts: Vec<NewNode>) -> Result<Vec<Node>, LoomError> {
        validate_batch_len(drafts.len())?;
        for draft in &drafts {
            draft.validate()?;
        }

        let at = write_time(None);
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id = self.allocate_node_id();
            let node = build_node(id, draft, at);
            self.nodes.insert(id, node.clone());
            created.push(node);
        }
        Ok(created)
    }

    fn get_node(&self, id: NodeId) -> Result<Option<Node>, LoomError> {
        Ok(self.nodes.get(&id).cloned())
    }

    fn contains_node(&self, id: NodeId) -> Result<bool, LoomError> {
        Ok(self.nodes.contains_key(&id))
    }

    fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, LoomError> {
        filter.validate()?;
        Ok(finish_node_query(
            self.nodes.values().cloned().collect(),
            filter,
        ))
    }

    fn update_node(&mut self, id: NodeId, patch: NodePatch) -> Result<Option<Node>, LoomError> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Ok(None);
        };
        apply_node_patch(node, patch);
        Ok(Some(node.clone()))
    }

    fn replace_node(&mut self, id: NodeId, draft: NewNode) -> Result<Option<Node>, LoomError> {
        draft.validate()?;
        let Some(node) = self.nodes.get_mut(&id) else {
            return Ok(None);
        };
        node.node_type = draft.node_type;
        node.label = draft.label;
        node.properties = draft.properties;
        node.updated_at = write_time(Some(node.created_at));
        Ok(Some(node.clone()))
    }

    fn delete_node(&mut self, id: NodeId) -> Result<Option<DeletedNode>, LoomError> {
        if !self.nodes.contains_key(&id) {
            return Ok(None);
        }

        // A self-loop sits in both sets; the union counts it once.
        let touching: BTreeSet<EdgeId> = self
            .outgoing
            .get(&id)
            .into_iter()
            .chain(self.incoming.get(&id))
            .flatten()
            .copied()
            .collect();

        let mut deleted_edge_count = 0;
        for edge_id in touching {
            if self.remove_edge_record(edge_id).is_some() {
                deleted_edge_count += 1;
            }
        }

        self.outgoing.remove(&id);
        self.incoming.remove(&id);
        self.embeddings.remove(&id);
        self.nodes.remove(&id);

        Ok(Some(DeletedNode {
            id,
            deleted_edge_count,
        }))
    }

    fn create_edge(&mut self, draft: NewEdge) -> Result<Edge, LoomError> {
        draft.validate()?;
        self.check_endpoints(&draft)?;
        let id = self.allocate_edge_id();
        let edge = build_edge(id, draft, write_time(None));
        self.insert_edge_record(edge.clone());
        Ok(edge)
    }

    fn create_edges(&mut self, drafts: Vec<NewEdge>) -> Result<Vec<Edge>, LoomError> {
        validate_batch_len(drafts.len())?;
        for draft in &drafts {
            draft.validate()?;
            self.check_endpoints(draft)?;
        }

        let at = write_time(None);
        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id = self.allocate_edge_id();
            let edge = build_edge(id, draft, at);
            self.insert_edge_record(edge.clone());
            created.push(edge);
        }
        Ok(created)
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>, LoomError> {
        Ok(self.edges.get(&id).cloned())
    }

    fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, LoomError> {
        filter.validate()?;
        let candidates = match (filter.source_id, filter.target_id) {
            (Some(source), _) => self.collect_edges(self.outgoing.get(&source)),
            (None, Some(target)) => self.collect_edges(self.incoming.get(&target)),
            (None, None) => self.edges.values().cloned().collect(),
        };
        Ok(finish_edge_query(candidates, filter))
    }

    fn update_edge(&mut self, id: EdgeId, patch: EdgePatch) -> Result<Option<Edge>, LoomError> {
        patch.validate()?;
        let Some(edge) = self.edges.get_mut(&id) else {
            return Ok(None);
        };
        apply_edge_patch(edge, patch);
        Ok(Some(edge.clone()))
    }

    fn delete_edge(&mut self, id: EdgeId) -> Result<Option<Edge>, LoomError> {
        Ok(self.remove_edge_record(id))
    }

    fn outgoing_edges(&self, id: NodeId) -> Result<Vec<Edge>, LoomError> {
        Ok(self.collect_edges(self.outgoing.get(&id)))
    }

    fn incoming_edges(&self, id: NodeId) -> Result<Vec<Edge>, LoomError> {
        Ok(self.collect_edges(self.incoming.get(&id)))
    }

    fn put_embedding(&mut self, id: NodeId, embedding: NodeEmbedding) -> Result<bool, LoomError> {
        if !self.nodes.contains_key(&id) {
            return Ok(false);
        }
        self.embeddings.insert(id, embedding);
        Ok(true)
    }

    fn embedding_for(&self, id: NodeId) -> Result<Option<NodeEmbedding>, LoomError> {
        Ok(self.embeddings.get(&id).cloned())
    }

    fn embeddings(&self) -> Result<Vec<(NodeId, NodeEmbedding)>, LoomError> {
        Ok(self
            .embeddings
            .iter()
            .map(|(id, e)| (*id, e.clone()))
            .collect())
    }

    fn node_count(&self) -> Result<usize, LoomError> {
        Ok(self.nodes.len())
    }

    fn edge_count(&self) -> Result<usize, LoomError> {
        Ok(self.edges.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
