//! # Similarity Engine
//!
//! Scoring primitives (cosine, edit distance, structural similarity) and
//! the searches built on them.
//!
//! Structural similarity of two node-shaped records:
//!
//! ```text
//! 0.3 * [types equal] + 0.4 * label_similarity + 0.3 * property_similarity
//! ```
//!
//! capped at 1.0. Restricting the comparison to a set of match fields
//! keeps the same weights for the included components and divides by
//! their total.

use crate::embedding::{EmbeddingService, ProviderKind, node_text};
use crate::graph::GraphStore;
use crate::primitives::{
    DEFAULT_HYBRID_THRESHOLD, DEFAULT_SEARCH_LIMIT, DEFAULT_TRADITIONAL_WEIGHT,
    DEFAULT_VECTOR_THRESHOLD, DEFAULT_VECTOR_WEIGHT, LABEL_WEIGHT, PROPERTY_WEIGHT, TYPE_WEIGHT,
};
use crate::{LoomError, NewNode, Node, NodeEmbedding, NodeFilter, NodeId, NodeRecord, Properties};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// SCORING PRIMITIVES
// =============================================================================

/// Cosine similarity. `0.0` when lengths differ or either vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Levenshtein distance over Unicode scalar values.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// `(max_len - distance) / max_len`; `1.0` when both labels are empty.
pub fn label_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    (max_len - levenshtein(a, b)) as f64 / max_len as f64
}

/// Fraction of the key union whose values are deeply equal on both sides.
/// An empty union scores `1.0`.
pub fn property_similarity(a: &Properties, b: &Properties) -> f64 {
    let keys: BTreeSet<&str> = a.keys().chain(b.keys()).map(String::as_str).collect();
    properties_agreement(a, b, &keys)
}

fn properties_agreement(a: &Properties, b: &Properties, keys: &BTreeSet<&str>) -> f64 {
    if keys.is_empty() {
        return 1.0;
    }
    let equal = keys
        .iter()
        .filter(|k| matches!((a.get(**k), b.get(**k)), (Some(x), Some(y)) if x == y))
        .count();
    equal as f64 / keys.len() as f64
}

/// Full structural similarity over type, label and properties.
pub fn structural_similarity(a: &impl NodeRecord, b: &impl NodeRecord) -> f64 {
    let type_score = if a.node_type() == b.node_type() {
        TYPE_WEIGHT
    } else {
        0.0
    };
    let score = type_score
        + LABEL_WEIGHT * label_similarity(a.label(), b.label())
        + PROPERTY_WEIGHT * property_similarity(a.properties(), b.properties());
    score.min(1.0)
}

/// Structural similarity restricted to `fields`.
///
/// `type` and `label` select those components and `properties` selects
/// the whole property map. Any other name is a property key; naming keys
/// restricts the property component to them, and a key absent from both
/// nodes never agrees. An empty selection scores 0.
pub fn structural_similarity_on(
    a: &impl NodeRecord,
    b: &impl NodeRecord,
    fields: &[String],
) -> f64 {
    let mut total = 0.0;
    let mut score = 0.0;

    if fields.iter().any(|f| f == "type") {
        total += TYPE_WEIGHT;
        if a.node_type() == b.node_type() {
            score += TYPE_WEIGHT;
        }
    }
    if fields.iter().any(|f| f == "label") {
        total += LABEL_WEIGHT;
        score += LABEL_WEIGHT * label_similarity(a.label(), b.label());
    }

    let property_keys: Vec<&str> = fields
        .iter()
        .map(String::as_str)
        .filter(|f| !matches!(*f, "type" | "label" | "properties"))
        .collect();
    if fields.iter().any(|f| f == "properties") {
        total += PROPERTY_WEIGHT;
        score += PROPERTY_WEIGHT * property_similarity(a.properties(), b.properties());
    } else if !property_keys.is_empty() {
        // A named key missing on both sides counts as a disagreement.
        let keys: BTreeSet<&str> = property_keys.into_iter().collect();
        total += PROPERTY_WEIGHT;
        score += PROPERTY_WEIGHT * properties_agreement(a.properties(), b.properties(), &keys);
    }

    if total == 0.0 {
        return 0.0;
    }
    (score / total).min(1.0)
}

/// Highest score first; equal scores keep the older node first.
fn by_score_desc(a: (f64, NodeId), b: (f64, NodeId)) -> Ordering {
    b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
}

// =============================================================================
// SEARCH OPTIONS & RESULTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSearchOptions {
    pub limit: usize,
    pub threshold: f64,
    pub model: Option<String>,
    pub provider: Option<ProviderKind>,
    /// Only consider nodes of these types.
    pub node_types: Option<Vec<String>>,
}

impl Default for VectorSearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            threshold: DEFAULT_VECTOR_THRESHOLD,
            model: None,
            provider: None,
            node_types: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSearchOptions {
    pub vector_weight: f64,
    pub traditional_weight: f64,
    pub threshold: f64,
    pub model: Option<String>,
    pub provider: Option<ProviderKind>,
    pub limit: Option<usize>,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            traditional_weight: DEFAULT_TRADITIONAL_WEIGHT,
            threshold: DEFAULT_HYBRID_THRESHOLD,
            model: None,
            provider: None,
            limit: None,
        }
    }
}

/// A node with its vector similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    pub node: Node,
    pub similarity: f64,
}

/// A node with its combined and per-component hybrid scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridMatch {
    pub node: Node,
    pub score: f64,
    pub vector_similarity: f64,
    pub structural_similarity: f64,
}

// =============================================================================
// SIMILARITY ENGINE
// =============================================================================

/// Similarity searches over a store's nodes and cached embeddings.
pub struct SimilarityEngine<'a> {
    store: &'a dyn GraphStore,
    embeddings: &'a EmbeddingService,
}

impl<'a> SimilarityEngine<'a> {
    #[must_use]
    pub fn new(store: &'a dyn GraphStore, embeddings: &'a EmbeddingService) -> Self {
        Self { store, embeddings }
    }

    /// Embed `query` and rank every node with a cached embedding.
    pub fn vector_search(
        &self,
        query: &str,
        options: &VectorSearchOptions,
    ) -> Result<Vec<ScoredNode>, LoomError> {
        let query = self
            .embeddings
            .generate(query, options.provider, options.model.as_deref())?;
        self.rank_by_vector(
            &query.embedding,
            options.node_types.as_deref(),
            options.threshold,
            options.limit,
        )
    }

    /// Rank cached embeddings against `query`, keeping scores at or above
    /// `threshold`.
    pub fn rank_by_vector(
        &self,
        query: &[f32],
        node_types: Option<&[String]>,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<ScoredNode>, LoomError> {
        let mut scored = Vec::new();
        for (id, embedding) in self.store.embeddings()? {
            let similarity = cosine_similarity(query, &embedding.vector);
            if similarity < threshold {
                continue;
            }
            let Some(node) = self.store.get_node(id)? else {
                continue;
            };
            if node_types.is_some_and(|types| !types.iter().any(|t| *t == node.node_type)) {
                continue;
            }
            scored.push(ScoredNode { node, similarity });
        }

        scored.sort_by(|a, b| by_score_desc((a.similarity, a.node.id), (b.similarity, b.node.id)));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Score every node against `candidate` by weighted vector and
    /// structural similarity. Nodes without a cached embedding get a
    /// vector similarity of 0.
    pub fn hybrid_search(
        &self,
        candidate: &NewNode,
        options: &HybridSearchOptions,
    ) -> Result<Vec<HybridMatch>, LoomError> {
        let query = self.embeddings.generate(
            &node_text(candidate),
            options.provider,
            options.model.as_deref(),
        )?;
        let cached: BTreeMap<NodeId, NodeEmbedding> = self.store.embeddings()?.into_iter().collect();

        let mut matches = Vec::new();
        for node in self.store.query_nodes(&NodeFilter::default())? {
            let vector_similarity = cached
                .get(&node.id)
                .map(|e| cosine_similarity(&query.embedding, &e.vector))
                .unwrap_or(0.0);
            let structural = structural_similarity(candidate, &node);
            let score =
                options.vector_weight * vector_similarity + options.traditional_weight * structural;
            if score >= options.threshold {
                matches.push(HybridMatch {
                    node,
                    score,
                    vector_similarity,
                    structural_similarity: structural,
                });
            }
        }

        matches.sort_by(|a, b| by_score_desc((a.score, a.node.id), (b.score, b.node.id)));
        if let Some(limit) = options.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    /// Best structural match for `candidate` over `fields`, if it reaches
    /// `threshold`.
    pub fn best_structural_match(
        &self,
        candidate: &NewNode,
        fields: &[String],
        threshold: f64,
    ) -> Result<Option<ScoredNode>, LoomError> {
        let mut best: Option<ScoredNode> = None;
        for node in self.store.query_nodes(&NodeFilter::default())? {
            let similarity = structural_similarity_on(candidate, &node, fields);
            if similarity < threshold {
                continue;
            }
            let better = best.as_ref().is_none_or(|b| {
                by_score_desc((similarity, node.id), (b.similarity, b.node.id)) == Ordering::Less
            });
            if better {
                best = Some(ScoredNode { node, similarity });
            }
        }
        Ok(best)
    }
}

// =============================================================================
// TESTS
// =============================================================================
