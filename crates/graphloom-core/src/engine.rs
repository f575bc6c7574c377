//! # Knowledge Graph
//!
//! `KnowledgeGraph` owns a storage backend and the embedding registry and
//! exposes the full engine surface front ends call: CRUD, traversal,
//! embeddings, similarity search and create-or-merge.
//!
//! ## Storage Backends
//!
//! - `InMemory`: `MemoryGraph` (fast, volatile)
//! - `Persistent`: `RedbStore` (disk-backed, ACID)

use crate::config::EngineConfig;
use crate::embedding::{EmbeddingResult, EmbeddingService, ProviderInfo, node_text};
use crate::graph::{GraphStore, MemoryGraph};
use crate::merge::{EdgeMergeOptions, MergeEngine, MergeOutcome, NodeMergeOptions};
use crate::similarity::{
    HybridMatch, HybridSearchOptions, ScoredNode, SimilarityEngine, VectorSearchOptions,
};
use crate::storage::RedbStore;
use crate::traversal::TraversalEngine;
use crate::{
    DeletedNode, Direction, Edge, EdgeFilter, EdgeId, EdgePatch, LoomError, Neighbor, NewEdge,
    NewNode, Node, NodeEmbedding, NodeFilter, NodeId, NodePatch, Subgraph,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend for a `KnowledgeGraph`.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory graph (fast, volatile).
    InMemory(MemoryGraph),
    /// Disk-backed graph using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl StorageBackend {
    fn store(&self) -> &dyn GraphStore {
        match self {
            Self::InMemory(graph) => graph,
            Self::Persistent(redb) => redb,
        }
    }

    fn store_mut(&mut self) -> &mut dyn GraphStore {
        match self {
            Self::InMemory(graph) => graph,
            Self::Persistent(redb) => redb,
        }
    }
}

// =============================================================================
// BATCH EMBEDDING REPORT
// =============================================================================

/// A node whose embedding could not be generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingFailure {
    pub node_id: NodeId,
    pub message: String,
}

/// Result of `generate_missing_embeddings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingBatchReport {
    /// Embeddings generated and stored.
    pub processed: usize,
    pub errors: Vec<EmbeddingFailure>,
}

// =============================================================================
// KNOWLEDGE GRAPH
// =============================================================================

#[derive(Debug)]
pub struct KnowledgeGraph {
    backend: StorageBackend,
    embeddings: EmbeddingService,
}

impl KnowledgeGraph {
    /// Assemble an engine from configuration. A configured storage path
    /// selects the persistent backend.
    pub fn new(config: &EngineConfig) -> Result<Self, LoomError> {
        let backend = match &config.storage.path {
            Some(path) => StorageBackend::Persistent(RedbStore::open(path)?),
            None => StorageBackend::InMemory(MemoryGraph::new()),
        };
        let embeddings = EmbeddingService::new(&config.embedding)?;
        tracing::info!(
            persistent = matches!(backend, StorageBackend::Persistent(_)),
            hermetic = config.embedding.is_hermetic(),
            "knowledge graph ready"
        );
        Ok(Self {
            backend,
            embeddings,
        })
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, LoomError> {
        Self::new(&EngineConfig::default().with_env_overrides())
    }

    /// Volatile engine with default embedding settings.
    pub fn in_memory() -> Result<Self, LoomError> {
        Self::new(&EngineConfig::default())
    }

    /// Open or create a redb-backed engine at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoomError> {
        let mut config = EngineConfig::default();
        config.storage.path = Some(path.as_ref().to_path_buf());
        Self::new(&config)
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    #[must_use]
    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    fn store(&self) -> &dyn GraphStore {
        self.backend.store()
    }

    fn store_mut(&mut self) -> &mut dyn GraphStore {
        self.backend.store_mut()
    }

    // =========================================================================
    // NODES
    // =========================================================================

    pub fn create_node(&mut self, draft: NewNode) -> Result<Node, LoomError> {
        self.store_mut().create_node(draft)
    }

    pub fn create_nodes(&mut self, drafts: Vec<NewNode>) -> Result<Vec<Node>, LoomError> {
        self.store_mut().create_nodes(drafts)
    }

    pub fn get_node(&self, id: NodeId) -> Result<Option<Node>, LoomError> {
        self.store().get_node(id)
    }

    pub fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, LoomError> {
        self.store().query_nodes(filter)
    }

    pub fn update_node(&mut self, id: NodeId, patch: NodePatch) -> Result<Option<Node>, LoomError> {
        self.store_mut().update_node(id, patch)
    }

    /// Delete a node and every edge touching it.
    pub fn delete_node(&mut self, id: NodeId) -> Result<Option<DeletedNode>, LoomError> {
        self.store_mut().delete_node(id)
    }

    // =========================================================================
    // EDGES
    // =========================================================================

    pub fn create_edge(&mut self, draft: NewEdge) -> Result<Edge, LoomError> {
        self.store_mut().create_edge(draft)
    }

    pub fn create_edges(&mut self, drafts: Vec<NewEdge>) -> Result<Vec<Edge>, LoomError> {
        self.store_mut().create_edges(drafts)
    }

    pub fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>, LoomError> {
        self.store().get_edge(id)
    }

    pub fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, LoomError> {
        self.store().query_edges(filter)
    }

    pub fn update_edge(&mut self, id: EdgeId, patch: EdgePatch) -> Result<Option<Edge>, LoomError> {
        self.store_mut().update_edge(id, patch)
    }

    pub fn delete_edge(&mut self, id: EdgeId) -> Result<Option<Edge>, LoomError> {
        self.store_mut().delete_edge(id)
    }

    // =========================================================================
    // TRAVERSAL
    // =========================================================================

    pub fn neighbors(&self, id: NodeId, direction: Direction) -> Result<Vec<Neighbor>, LoomError> {
        TraversalEngine::new(self.store()).neighbors(id, direction)
    }

    pub fn find_path(
        &self,
        from: NodeId,
        to: NodeId,
        max_depth: usize,
    ) -> Result<Option<Vec<Node>>, LoomError> {
        TraversalEngine::new(self.store()).find_path(from, to, max_depth)
    }

    pub fn subgraph(
        &self,
        centers: &[NodeId],
        depth: usize,
        edge_types: Option<&[&str]>,
    ) -> Result<Subgraph, LoomError> {
        TraversalEngine::new(self.store()).subgraph(centers, depth, edge_types)
    }

    // =========================================================================
    // EMBEDDINGS
    // =========================================================================

    /// Embed one node and cache the result. `None` if the node is missing.
    pub fn generate_node_embedding(
        &mut self,
        id: NodeId,
        model: Option<&str>,
    ) -> Result<Option<EmbeddingResult>, LoomError> {
        let Some(node) = self.store().get_node(id)? else {
            return Ok(None);
        };
        let result = self.embeddings.generate(&node_text(&node), None, model)?;
        self.backend
            .store_mut()
            .put_embedding(id, result.clone().into_node_embedding())?;
        Ok(Some(result))
    }

    /// Embed every node without a cached embedding. When `model` is named,
    /// embeddings produced by another model count as missing too.
    ///
    /// Embedding failures are collected per node; storage failures abort.
    pub fn generate_missing_embeddings(
        &mut self,
        model: Option<&str>,
    ) -> Result<EmbeddingBatchReport, LoomError> {
        let nodes = self.store().query_nodes(&NodeFilter::default())?;
        let mut report = EmbeddingBatchReport::default();

        for node in nodes {
            let cached = self.store().embedding_for(node.id)?;
            let stale = cached.is_none_or(|e| model.is_some_and(|m| e.model != m));
            if !stale {
                continue;
            }

            match self.embeddings.generate(&node_text(&node), None, model) {
                Ok(result) => {
                    self.backend
                        .store_mut()
                        .put_embedding(node.id, result.into_node_embedding())?;
                    report.processed += 1;
                }
                Err(e) if e.is_embedding_error() => {
                    tracing::warn!(node = %node.id, error = %e, "embedding skipped");
                    report.errors.push(EmbeddingFailure {
                        node_id: node.id,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            processed = report.processed,
            errors = report.errors.len(),
            "missing embeddings generated"
        );
        Ok(report)
    }

    pub fn embedding_for(&self, id: NodeId) -> Result<Option<NodeEmbedding>, LoomError> {
        self.store().embedding_for(id)
    }

    #[must_use]
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        self.embeddings.provider_info()
    }

    // =========================================================================
    // SIMILARITY & MERGE
    // =========================================================================

    pub fn vector_search(
        &self,
        query: &str,
        options: &VectorSearchOptions,
    ) -> Result<Vec<ScoredNode>, LoomError> {
        SimilarityEngine::new(self.store(), &self.embeddings).vector_search(query, options)
    }

    pub fn hybrid_search(
        &self,
        candidate: &NewNode,
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridMatch>, LoomError> {
        SimilarityEngine::new(self.store(), &self.embeddings).hybrid_search(candidate, options)
    }

    pub fn create_or_merge_node(
        &mut self,
        candidate: NewNode,
        options: &NodeMergeOptions,
    ) -> Result<MergeOutcome<Node>, LoomError> {
        MergeEngine::new(self.backend.store_mut(), &self.embeddings)
            .create_or_merge_node(candidate, options)
    }

    pub fn create_or_merge_edge(
        &mut self,
        candidate: NewEdge,
        options: &EdgeMergeOptions,
    ) -> Result<MergeOutcome<Edge>, LoomError> {
        MergeEngine::new(self.backend.store_mut(), &self.embeddings)
            .create_or_merge_edge(candidate, options)
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    pub fn node_count(&self) -> Result<usize, LoomError> {
        self.store().node_count()
    }

    pub fn edge_count(&self) -> Result<usize, LoomError> {
        self.store().edge_count()
    }

    /// Compact the durable store. A no-op for the in-memory backend.
    pub fn compact(&mut self) -> Result<(), LoomError> {
        match &mut self.backend {
            StorageBackend::InMemory(_) => Ok(()),
            StorageBackend::Persistent(redb) => redb.compact(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
