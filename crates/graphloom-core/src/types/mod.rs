//! # Core Type Definitions
//!
//! This module contains the data model shared by every engine component:
//! - Record identifiers (`NodeId`, `EdgeId`)
//! - Persisted records (`Node`, `Edge`, `NodeEmbedding`)
//! - Write drafts and patches (`NewNode`, `NodePatch`, `NewEdge`, `EdgePatch`)
//! - Query shapes (`NodeFilter`, `EdgeFilter`, `Direction`)
//! - Property values (`PropertyValue`, `Properties`)
//! - Error types (`LoomError`)
//!
//! ## Identity Guarantees
//!
//! Ids are assigned by the store from a monotonic counter and are never
//! reused or mutated once handed out.

use crate::primitives::{MAX_BATCH_SIZE, MAX_QUERY_LIMIT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier for a node. Assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Unique identifier for an edge. Assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge:{}", self.0)
    }
}

// =============================================================================
// PROPERTY VALUES
// =============================================================================

/// Open-ended, string-keyed property map attached to nodes and edges.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A JSON-compatible property value.
///
/// The set of kinds is closed so that merging can dispatch on the variant
/// instead of inspecting values at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum PropertyValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Map(Properties),
}

impl PropertyValue {
    /// Borrow the value as a string slice when it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value (ints are widened).
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert into a `serde_json::Value`. Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(PropertyValue::to_json).collect())
            }
            Self::Map(map) => properties_to_json(map),
        }
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(PropertyValue::from).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, PropertyValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Convert a JSON object into a property map.
///
/// Returns `LoomError::MalformedInput` for anything other than an object
/// (or `null`, which yields an empty map).
pub fn properties_from_json(value: serde_json::Value) -> Result<Properties, LoomError> {
    match value {
        serde_json::Value::Null => Ok(Properties::new()),
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, PropertyValue::from(v)))
            .collect()),
        other => Err(LoomError::MalformedInput(format!(
            "properties must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Convert a property map into a JSON object.
#[must_use]
pub fn properties_to_json(properties: &Properties) -> serde_json::Value {
    serde_json::Value::Object(
        properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// =============================================================================
// NODE
// =============================================================================

/// A typed, labeled node with free-form properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Draft for a node that has not been written yet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewNode {
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    #[serde(default)]
    pub properties: Properties,
}

impl NewNode {
    /// Create a draft with an empty property map.
    #[must_use]
    pub fn new(node_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            label: label.into(),
            properties: Properties::new(),
        }
    }

    /// Add a single property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Replace the property map.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Reject drafts the store must never persist.
    pub fn validate(&self) -> Result<(), LoomError> {
        if self.node_type.trim().is_empty() {
            return Err(LoomError::MalformedInput(
                "node type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update for a node. `None` fields are left untouched.
///
/// Node type is not patchable through this path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodePatch {
    pub label: Option<String>,
    pub properties: Option<Properties>,
}

/// Read-only view over anything shaped like a node, persisted or not.
pub trait NodeRecord {
    fn node_type(&self) -> &str;
    fn label(&self) -> &str;
    fn properties(&self) -> &Properties;
}

impl NodeRecord for Node {
    fn node_type(&self) -> &str {
        &self.node_type
    }
    fn label(&self) -> &str {
        &self.label
    }
    fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl NodeRecord for NewNode {
    fn node_type(&self) -> &str {
        &self.node_type
    }
    fn label(&self) -> &str {
        &self.label
    }
    fn properties(&self) -> &Properties {
        &self.properties
    }
}

/// Report returned by a successful node delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedNode {
    pub id: NodeId,
    pub deleted_edge_count: usize,
}

// =============================================================================
// EDGE
// =============================================================================

/// A directed, typed edge. Weight is optional and may take any finite value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub properties: Properties,
    pub weight: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Draft for an edge that has not been written yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEdge {
    pub source_id: NodeId,
    pub target_id: NodeId,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub weight: Option<f64>,
}

impl NewEdge {
    /// Create an unweighted draft with no properties.
    #[must_use]
    pub fn new(source_id: NodeId, target_id: NodeId, edge_type: impl Into<String>) -> Self {
        Self {
            source_id,
            target_id,
            edge_type: edge_type.into(),
            properties: Properties::new(),
            weight: None,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Reject drafts the store must never persist.
    ///
    /// Endpoint existence is checked by the store inside the write.
    pub fn validate(&self) -> Result<(), LoomError> {
        if self.edge_type.trim().is_empty() {
            return Err(LoomError::MalformedInput(
                "edge type must not be empty".to_string(),
            ));
        }
        validate_weight(self.weight)
    }
}

/// Partial update for an edge. `None` fields are left untouched.
///
/// `weight` is doubly optional: `Some(None)` (JSON `null`) clears the
/// weight, an absent field keeps it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgePatch {
    pub edge_type: Option<String>,
    pub properties: Option<Properties>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub weight: Option<Option<f64>>,
}

impl EdgePatch {
    pub fn validate(&self) -> Result<(), LoomError> {
        if self
            .edge_type
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(LoomError::MalformedInput(
                "edge type must not be empty".to_string(),
            ));
        }
        validate_weight(self.weight.flatten())
    }
}

/// Maps a present field, `null` included, to `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn validate_weight(weight: Option<f64>) -> Result<(), LoomError> {
    match weight {
        Some(w) if !w.is_finite() => Err(LoomError::MalformedInput(format!(
            "edge weight must be finite, got {w}"
        ))),
        _ => Ok(()),
    }
}

/// Which end of an edge a referential-integrity failure concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEnd {
    Source,
    Target,
}

impl fmt::Display for EdgeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

// =============================================================================
// EMBEDDINGS
// =============================================================================

/// A cached embedding for one node, tagged with the model that produced it.
///
/// Not invalidated when the node changes; regenerating is the caller's call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEmbedding {
    pub model: String,
    pub provider: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// QUERIES
// =============================================================================

/// Filter for node queries. Results are ordered newest first, then paginated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeFilter {
    /// Exact type match.
    #[serde(rename = "type")]
    pub node_type: Option<String>,
    /// Case-sensitive substring of the label.
    pub label: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl NodeFilter {
    #[must_use]
    pub fn of_type(node_type: impl Into<String>) -> Self {
        Self {
            node_type: Some(node_type.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), LoomError> {
        validate_limit(self.limit)
    }
}

/// Filter for edge queries. Results are ordered newest first, then paginated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeFilter {
    pub source_id: Option<NodeId>,
    pub target_id: Option<NodeId>,
    #[serde(rename = "type")]
    pub edge_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EdgeFilter {
    pub fn validate(&self) -> Result<(), LoomError> {
        validate_limit(self.limit)
    }
}

fn validate_limit(limit: Option<usize>) -> Result<(), LoomError> {
    match limit {
        Some(l) if l > MAX_QUERY_LIMIT => Err(LoomError::MalformedInput(format!(
            "limit {l} exceeds maximum of {MAX_QUERY_LIMIT}"
        ))),
        _ => Ok(()),
    }
}

/// Reject batches larger than the store accepts in one transaction.
pub(crate) fn validate_batch_len(len: usize) -> Result<(), LoomError> {
    if len > MAX_BATCH_SIZE {
        return Err(LoomError::MalformedInput(format!(
            "batch of {len} records exceeds maximum of {MAX_BATCH_SIZE}"
        )));
    }
    Ok(())
}

/// Edge direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges whose target is the node.
    In,
    /// Edges whose source is the node.
    Out,
    /// Both of the above, in-results first.
    Both,
}

impl FromStr for Direction {
    type Err = LoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            "both" => Ok(Self::Both),
            other => Err(LoomError::MalformedInput(format!(
                "unknown direction '{other}', expected in, out or both"
            ))),
        }
    }
}

/// One neighbor of a node, with the edge that connects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub edge: Edge,
    pub node: Node,
    /// `In` when `node` is the edge's source, `Out` when it is the target.
    pub direction: Direction,
}

/// Result of a bounded subgraph extraction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the engine.
///
/// Missing records on by-id reads, updates and deletes are reported as
/// `None`, not as errors.
#[derive(Debug, Error)]
pub enum LoomError {
    /// An edge write referenced a node that does not exist.
    #[error("Referential integrity violation: {end} node {node} does not exist")]
    ReferentialIntegrity { end: EdgeEnd, node: NodeId },

    /// Input was rejected before any write was attempted.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The embedding backend does not know the requested model.
    #[error("Unsupported embedding model '{model}' for provider '{provider}'")]
    UnsupportedModel { provider: String, model: String },

    /// No embedding backend could be used.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The embedding backend kept failing until the retry budget ran out.
    #[error("Embedding generation failed on '{provider}' after {attempts} attempt(s): {reason}")]
    EmbeddingFailed {
        provider: String,
        attempts: u32,
        reason: String,
    },

    /// A node disappeared in the middle of a multi-step operation.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// An edge disappeared in the middle of a multi-step operation.
    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// The storage engine failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoomError {
    /// True for failures that originate in the embedding layer.
    #[must_use]
    pub fn is_embedding_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedModel { .. }
                | Self::ProviderUnavailable(_)
                | Self::EmbeddingFailed { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_value_json_conversion_keeps_shape() {
        let raw = json!({
            "timeout": 5000,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "nested": {"enabled": true, "name": null}
        });

        let props = properties_from_json(raw.clone()).expect("object");
        assert_eq!(props.get("timeout"), Some(&PropertyValue::Int(5000)));
        assert_eq!(props.get("ratio"), Some(&PropertyValue::Float(0.5)));
        assert_eq!(properties_to_json(&props), raw);
    }

    #[test]
    fn properties_from_json_rejects_non_objects() {
        let result = properties_from_json(json!([1, 2, 3]));
        assert!(matches!(result, Err(LoomError::MalformedInput(_))));

        let empty = properties_from_json(serde_json::Value::Null).expect("null");
        assert!(empty.is_empty());
    }

    #[test]
    fn non_finite_float_serializes_as_null() {
        assert_eq!(PropertyValue::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn new_node_requires_type() {
        assert!(NewNode::new("Component", "Login").validate().is_ok());
        assert!(matches!(
            NewNode::new("  ", "Login").validate(),
            Err(LoomError::MalformedInput(_))
        ));
    }

    #[test]
    fn new_edge_rejects_non_finite_weight() {
        let edge = NewEdge::new(NodeId(1), NodeId(2), "calls").with_weight(f64::INFINITY);
        assert!(matches!(edge.validate(), Err(LoomError::MalformedInput(_))));

        let ok = NewEdge::new(NodeId(1), NodeId(1), "calls").with_weight(-0.0);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn edge_patch_distinguishes_null_weight_from_absent() {
        let clear: EdgePatch = serde_json::from_value(json!({"weight": null})).expect("patch");
        assert_eq!(clear.weight, Some(None));

        let keep: EdgePatch = serde_json::from_value(json!({"properties": null})).expect("patch");
        assert_eq!(keep.weight, None);

        let set: EdgePatch = serde_json::from_value(json!({"weight": 0.25})).expect("patch");
        assert_eq!(set.weight, Some(Some(0.25)));

        let bad = EdgePatch {
            weight: Some(Some(f64::NAN)),
            ..EdgePatch::default()
        };
        assert!(matches!(bad.validate(), Err(LoomError::MalformedInput(_))));
    }

    #[test]
    fn filter_limit_is_bounded() {
        let filter = NodeFilter {
            limit: Some(MAX_QUERY_LIMIT + 1),
            ..NodeFilter::default()
        };
        assert!(filter.validate().is_err());
        assert!(NodeFilter::of_type("Service").validate().is_ok());
    }

    #[test]
    fn direction_parses_known_names() {
        assert_eq!("in".parse::<Direction>().expect("in"), Direction::In);
        assert_eq!("out".parse::<Direction>().expect("out"), Direction::Out);
        assert_eq!("both".parse::<Direction>().expect("both"), Direction::Both);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn embedding_errors_are_classified() {
        let err = LoomError::UnsupportedModel {
            provider: "simple".into(),
            model: "gpt".into(),
        };
        assert!(err.is_embedding_error());
        assert!(!LoomError::Storage("disk".into()).is_embedding_error());
        assert!(err.to_string().contains("gpt"));
    }
}
