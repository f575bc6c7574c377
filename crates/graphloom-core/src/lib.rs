//! # graphloom-core
//!
//! An embedded knowledge-graph engine: typed nodes and directed, typed,
//! weighted edges with CRUD, traversal, text embeddings, similarity search
//! and conflict-resolving merges.
//!
//! ## Components
//!
//! - `graph` / `storage`: the `GraphStore` contract with an in-memory and
//!   a redb-backed implementation
//! - `traversal`: neighbors, shortest path, bounded subgraphs
//! - `embedding`: pluggable text-embedding backends with fallback and retry
//! - `similarity` / `merge`: structural and vector scoring, deduplicating
//!   upserts
//! - `engine`: the `KnowledgeGraph` facade tying them together
//!
//! ## Architectural Constraints
//!
//! - Embedded: no server, no async runtime
//! - Single writer: concurrency is whatever redb guarantees
//! - The deterministic embedding backend is always available
//! - The crate never installs a tracing subscriber

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod embedding;
pub mod engine;
pub mod graph;
pub mod merge;
pub mod primitives;
pub mod similarity;
pub mod storage;
pub mod traversal;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    DeletedNode, Direction, Edge, EdgeEnd, EdgeFilter, EdgeId, EdgePatch, LoomError, Neighbor,
    NewEdge, NewNode, Node, NodeEmbedding, NodeFilter, NodeId, NodePatch, NodeRecord, Properties,
    PropertyValue, Subgraph, properties_from_json, properties_to_json,
};

// =============================================================================
// RE-EXPORTS: Engine Components
// =============================================================================

pub use config::{EmbeddingConfig, EngineConfig, OllamaConfig, StorageConfig};
pub use embedding::{
    EmbeddingProvider, EmbeddingResult, EmbeddingService, OllamaEmbeddingProvider, ProviderInfo,
    ProviderKind, SimpleEmbeddingProvider,
};
pub use engine::{EmbeddingBatchReport, EmbeddingFailure, KnowledgeGraph, StorageBackend};
pub use graph::{GraphStore, MemoryGraph};
pub use merge::{
    EdgeMergeOptions, MergeAction, MergeEngine, MergeOutcome, MergeStrategy, NodeMergeOptions,
};
pub use similarity::{
    HybridMatch, HybridSearchOptions, ScoredNode, SimilarityEngine, VectorSearchOptions,
    cosine_similarity,
};
pub use storage::RedbStore;
pub use traversal::TraversalEngine;
