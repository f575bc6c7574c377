//! # Engine Primitives
//!
//! Compiled-in constants for the graphloom engine: hard limits that keep
//! every call bounded, the structural-similarity weights, and the defaults
//! used by search and merge options.

// =============================================================================
// BOUNDS
// =============================================================================

/// Maximum traversal depth for path finding and subgraph extraction.
///
/// Caller-supplied depths above this are clamped.
pub const MAX_TRAVERSAL_DEPTH: usize = 100;

/// Maximum page size for node and edge queries.
pub const MAX_QUERY_LIMIT: usize = 10_000;

/// Maximum number of records in a single bulk create.
pub const MAX_BATCH_SIZE: usize = 10_000;

// =============================================================================
// STRUCTURAL SIMILARITY
// =============================================================================

/// Contribution of an exact type match.
pub const TYPE_WEIGHT: f64 = 0.3;

/// Contribution of normalized label similarity.
pub const LABEL_WEIGHT: f64 = 0.4;

/// Contribution of property agreement.
pub const PROPERTY_WEIGHT: f64 = 0.3;

// =============================================================================
// SEARCH & MERGE DEFAULTS
// =============================================================================

pub const DEFAULT_SEARCH_LIMIT: usize = 10;

pub const DEFAULT_VECTOR_THRESHOLD: f64 = 0.7;

pub const DEFAULT_HYBRID_THRESHOLD: f64 = 0.5;

pub const DEFAULT_VECTOR_WEIGHT: f64 = 0.7;

pub const DEFAULT_TRADITIONAL_WEIGHT: f64 = 0.3;

pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.8;

// =============================================================================
// DETERMINISTIC EMBEDDING LAYOUT
// =============================================================================
//
// [ a-z | 0-9 | word buckets | length stats | bigram buckets ]

/// Character-frequency buckets: 26 letters followed by 10 digits.
pub const CHAR_BUCKETS: usize = 36;

/// Hashed word buckets, weighted by word position.
pub const WORD_BUCKETS: usize = 96;

/// Aggregate length statistics.
pub const STAT_BUCKETS: usize = 4;

/// Hashed character-bigram buckets.
pub const BIGRAM_BUCKETS: usize = 120;

/// Total length of a deterministic embedding.
pub const SIMPLE_EMBEDDING_DIMENSIONS: usize =
    CHAR_BUCKETS + WORD_BUCKETS + STAT_BUCKETS + BIGRAM_BUCKETS;
