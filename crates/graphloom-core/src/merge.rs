//! # Merge Engine
//!
//! Create-or-merge for nodes and edges. A candidate is matched against the
//! store; without a match it is created, with one the merge strategy
//! decides what happens to the existing record.
//!
//! Property merge rules (`deep_merge`):
//! - array + array: existing order kept, novel candidate items appended
//! - map + map: merged recursively
//! - anything else: the candidate value wins
//! - keys only on the existing side are kept

use crate::embedding::{EmbeddingResult, EmbeddingService, node_text};
use crate::graph::GraphStore;
use crate::primitives::DEFAULT_MERGE_THRESHOLD;
use crate::similarity::{ScoredNode, SimilarityEngine};
use crate::{
    Edge, EdgeFilter, EdgePatch, LoomError, NewEdge, NewNode, Node, NodePatch, Properties,
    PropertyValue,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// PROPERTY & WEIGHT MERGING
// =============================================================================

/// Merge `incoming` into a copy of `existing`.
pub fn deep_merge(existing: &Properties, incoming: &Properties) -> Properties {
    let mut merged = existing.clone();
    for (key, value) in incoming {
        let combined = match (merged.remove(key), value) {
            (Some(PropertyValue::Array(mut items)), PropertyValue::Array(novel)) => {
                for item in novel {
                    if !items.contains(item) {
                        items.push(item.clone());
                    }
                }
                PropertyValue::Array(items)
            }
            (Some(PropertyValue::Map(nested)), PropertyValue::Map(novel)) => {
                PropertyValue::Map(deep_merge(&nested, novel))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

/// Mean of both weights, or whichever one is defined.
#[must_use]
pub fn merge_weights(existing: Option<f64>, incoming: Option<f64>) -> Option<f64> {
    match (existing, incoming) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (a, b) => b.or(a),
    }
}

// =============================================================================
// OPTIONS & OUTCOMES
// =============================================================================

/// What to do with an existing record that matches a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Leave the existing record untouched.
    Skip,
    /// Overwrite the existing record with the candidate.
    Update,
    /// Deep-merge candidate properties into the existing record.
    #[default]
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeAction {
    Created,
    Merged,
    Skipped,
}

/// Result of a create-or-merge call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome<T> {
    pub action: MergeAction,
    /// The created, merged or untouched record.
    pub record: T,
    /// Match score, when a match was found.
    pub similarity: Option<f64>,
}

impl<T> MergeOutcome<T> {
    fn created(record: T) -> Self {
        Self {
            action: MergeAction::Created,
            record,
            similarity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMergeOptions {
    pub strategy: MergeStrategy,
    pub similarity_threshold: f64,
    /// Fields compared by structural matching. See
    /// `similarity::structural_similarity_on`.
    pub match_fields: Vec<String>,
    pub use_vector_similarity: bool,
    pub embedding_model: Option<String>,
}

impl Default for NodeMergeOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Merge,
            similarity_threshold: DEFAULT_MERGE_THRESHOLD,
            match_fields: vec!["type".to_string(), "label".to_string()],
            use_vector_similarity: false,
            embedding_model: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeMergeOptions {
    pub strategy: MergeStrategy,
    /// Always create, never look for an existing edge.
    pub allow_multiple_types: bool,
}

// =============================================================================
// MERGE ENGINE
// =============================================================================

pub struct MergeEngine<'a> {
    store: &'a mut dyn GraphStore,
    embeddings: &'a EmbeddingService,
}

impl<'a> MergeEngine<'a> {
    pub fn new(store: &'a mut dyn GraphStore, embeddings: &'a EmbeddingService) -> Self {
        Self { store, embeddings }
    }

    /// Create `candidate`, or apply `options.strategy` to its best match.
    pub fn create_or_merge_node(
        &mut self,
        candidate: NewNode,
        options: &NodeMergeOptions,
    ) -> Result<MergeOutcome<Node>, LoomError> {
        candidate.validate()?;
        let (matched, embedding) = self.find_node_match(&candidate, options)?;

        let Some(ScoredNode {
            node: existing,
            similarity,
        }) = matched
        else {
            let node = self.store.create_node(candidate)?;
            if let Some(embedding) = embedding {
                self.store
                    .put_embedding(node.id, embedding.into_node_embedding())?;
            }
            tracing::debug!(node = %node.id, "no match, node created");
            return Ok(MergeOutcome::created(node));
        };

        tracing::debug!(node = %existing.id, similarity, strategy = ?options.strategy, "node matched");
        let (action, record) = match options.strategy {
            MergeStrategy::Skip => (MergeAction::Skipped, existing),
            MergeStrategy::Update => {
                let id = existing.id;
                let node = self
                    .store
                    .replace_node(id, candidate)?
                    .ok_or(LoomError::NodeNotFound(id))?;
                (MergeAction::Merged, node)
            }
            MergeStrategy::Merge => {
                let id = existing.id;
                let patch = NodePatch {
                    label: None,
                    properties: Some(deep_merge(&existing.properties, &candidate.properties)),
                };
                let node = self
                    .store
                    .update_node(id, patch)?
                    .ok_or(LoomError::NodeNotFound(id))?;
                (MergeAction::Merged, node)
            }
        };

        Ok(MergeOutcome {
            action,
            record,
            similarity: Some(similarity),
        })
    }

    /// Best match for `candidate`, plus the candidate embedding when one
    /// was computed.
    fn find_node_match(
        &self,
        candidate: &NewNode,
        options: &NodeMergeOptions,
    ) -> Result<(Option<ScoredNode>, Option<EmbeddingResult>), LoomError> {
        let engine = SimilarityEngine::new(&*self.store, self.embeddings);

        if options.use_vector_similarity {
            match self.embeddings.generate(
                &node_text(candidate),
                None,
                options.embedding_model.as_deref(),
            ) {
                Ok(embedding) => {
                    let same_type = [candidate.node_type.clone()];
                    let best = engine
                        .rank_by_vector(
                            &embedding.embedding,
                            Some(&same_type),
                            options.similarity_threshold,
                            1,
                        )?
                        .into_iter()
                        .next();
                    return Ok((best, Some(embedding)));
                }
                Err(e) if e.is_embedding_error() => {
                    tracing::warn!(error = %e, "embedding failed, falling back to structural matching");
                }
                Err(e) => return Err(e),
            }
        }

        let best = engine.best_structural_match(
            candidate,
            &options.match_fields,
            options.similarity_threshold,
        )?;
        Ok((best, None))
    }

    /// Create `candidate`, or apply `options.strategy` to the existing edge
    /// with the same source, target and type.
    pub fn create_or_merge_edge(
        &mut self,
        candidate: NewEdge,
        options: &EdgeMergeOptions,
    ) -> Result<MergeOutcome<Edge>, LoomError> {
        candidate.validate()?;

        let existing = if options.allow_multiple_types {
            None
        } else {
            let filter = EdgeFilter {
                source_id: Some(candidate.source_id),
                target_id: Some(candidate.target_id),
                edge_type: Some(candidate.edge_type.clone()),
                limit: Some(1),
                offset: None,
            };
            self.store.query_edges(&filter)?.into_iter().next()
        };

        let Some(existing) = existing else {
            return Ok(MergeOutcome::created(self.store.create_edge(candidate)?));
        };

        let patch = match options.strategy {
            MergeStrategy::Skip => {
                return Ok(MergeOutcome {
                    action: MergeAction::Skipped,
                    record: existing,
                    similarity: None,
                });
            }
            MergeStrategy::Update => EdgePatch {
                edge_type: None,
                properties: Some(candidate.properties),
                weight: candidate.weight.map(Some),
            },
            MergeStrategy::Merge => EdgePatch {
                edge_type: None,
                properties: Some(deep_merge(&existing.properties, &candidate.properties)),
                weight: merge_weights(existing.weight, candidate.weight).map(Some),
            },
        };

        let id = existing.id;
        let edge = self
            .store
            .update_edge(id, patch)?
            .ok_or(LoomError::EdgeNotFound(id))?;
        tracing::debug!(edge = %id, strategy = ?options.strategy, "edge merged");

        Ok(MergeOutcome {
            action: MergeAction::Merged,
            record: edge,
            similarity: None,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
