//! # redb-backed Graph Storage
//!
//! A disk-backed graph store using the redb embedded database.
//!
//! Every write runs in a single redb transaction, which gives:
//! - ACID commits (a failed bulk write leaves nothing behind)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Records are postcard-encoded. Secondary indices are composite-key tables
//! with unit values, scanned with range queries.

use crate::graph::{
    GraphStore, apply_edge_patch, apply_node_patch, build_edge, build_node, finish_edge_query,
    finish_node_query, write_time,
};
use crate::types::validate_batch_len;
use crate::{
    DeletedNode, Edge, EdgeEnd, EdgeFilter, EdgeId, EdgePatch, LoomError, NewEdge, NewNode, Node,
    NodeEmbedding, NodeFilter, NodeId, NodePatch,
};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata, Table,
    TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Table for nodes: NodeId(u64) -> serialized Node bytes
const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");

/// Table for edges: EdgeId(u64) -> serialized Edge bytes
const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");

/// Index: (node_type, node_id) -> ()
const NODE_TYPE_INDEX: TableDefinition<(&str, u64), ()> = TableDefinition::new("node_type_index");

/// Index: (source_id, edge_id) -> ()
const EDGE_OUT: TableDefinition<(u64, u64), ()> = TableDefinition::new("edge_out");

/// Index: (target_id, edge_id) -> ()
const EDGE_IN: TableDefinition<(u64, u64), ()> = TableDefinition::new("edge_in");

/// Index: (edge_type, edge_id) -> ()
const EDGE_TYPE_INDEX: TableDefinition<(&str, u64), ()> = TableDefinition::new("edge_type_index");

/// Table for cached embeddings: NodeId(u64) -> serialized NodeEmbedding bytes
const EMBEDDINGS: TableDefinition<u64, &[u8]> = TableDefinition::new("embeddings");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_NODE_ID: &str = "next_node_id";
const NEXT_EDGE_ID: &str = "next_edge_id";

// =============================================================================
// ERROR & CODEC HELPERS
// =============================================================================

fn storage_err(e: impl fmt::Display) -> LoomError {
    LoomError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LoomError> {
    postcard::to_allocvec(value).map_err(|e| LoomError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LoomError> {
    postcard::from_bytes(bytes).map_err(|e| LoomError::Serialization(e.to_string()))
}

fn load<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    key: u64,
) -> Result<Option<T>, LoomError> {
    match table.get(key).map_err(storage_err)? {
        Some(bytes) => decode(bytes.value()).map(Some),
        None => Ok(None),
    }
}

fn load_all<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
) -> Result<Vec<T>, LoomError> {
    let mut records = Vec::new();
    for entry in table.iter().map_err(storage_err)? {
        let (_, bytes) = entry.map_err(storage_err)?;
        records.push(decode(bytes.value())?);
    }
    Ok(records)
}

/// Edge ids adjacent to `owner` in an adjacency index, ascending.
fn adjacent_ids(
    table: &impl ReadableTable<(u64, u64), ()>,
    owner: u64,
) -> Result<Vec<u64>, LoomError> {
    let mut ids = Vec::new();
    for entry in table
        .range((owner, 0u64)..=(owner, u64::MAX))
        .map_err(storage_err)?
    {
        let (key, _) = entry.map_err(storage_err)?;
        ids.push(key.value().1);
    }
    Ok(ids)
}

/// Record ids filed under `name` in a type index, ascending.
fn typed_ids(
    table: &impl ReadableTable<(&'static str, u64), ()>,
    name: &str,
) -> Result<Vec<u64>, LoomError> {
    let mut ids = Vec::new();
    for entry in table
        .range((name, 0u64)..=(name, u64::MAX))
        .map_err(storage_err)?
    {
        let (key, _) = entry.map_err(storage_err)?;
        ids.push(key.value().1);
    }
    Ok(ids)
}

fn load_ids<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    ids: &[u64],
) -> Result<Vec<T>, LoomError> {
    let mut records = Vec::with_capacity(ids.len());
    for &id in ids {
        if let Some(record) = load(table, id)? {
            records.push(record);
        }
    }
    Ok(records)
}

// =============================================================================
// WRITE TABLES
// =============================================================================

/// Every table opened inside one write transaction.
struct WriteTables<'txn> {
    nodes: Table<'txn, u64, &'static [u8]>,
    edges: Table<'txn, u64, &'static [u8]>,
    node_types: Table<'txn, (&'static str, u64), ()>,
    edge_out: Table<'txn, (u64, u64), ()>,
    edge_in: Table<'txn, (u64, u64), ()>,
    edge_types: Table<'txn, (&'static str, u64), ()>,
    embeddings: Table<'txn, u64, &'static [u8]>,
    metadata: Table<'txn, &'static str, u64>,
}

impl<'txn> WriteTables<'txn> {
    fn open(txn: &'txn WriteTransaction) -> Result<Self, LoomError> {
        Ok(Self {
            nodes: txn.open_table(NODES).map_err(storage_err)?,
            edges: txn.open_table(EDGES).map_err(storage_err)?,
            node_types: txn.open_table(NODE_TYPE_INDEX).map_err(storage_err)?,
            edge_out: txn.open_table(EDGE_OUT).map_err(storage_err)?,
            edge_in: txn.open_table(EDGE_IN).map_err(storage_err)?,
            edge_types: txn.open_table(EDGE_TYPE_INDEX).map_err(storage_err)?,
            embeddings: txn.open_table(EMBEDDINGS).map_err(storage_err)?,
            metadata: txn.open_table(METADATA).map_err(storage_err)?,
        })
    }

    fn set_counter(&mut self, key: &str, value: u64) -> Result<(), LoomError> {
        self.metadata.insert(key, value).map_err(storage_err)?;
        Ok(())
    }

    fn has_node(&self, id: NodeId) -> Result<bool, LoomError> {
        Ok(self.nodes.get(id.0).map_err(storage_err)?.is_some())
    }

    /// Write a node and its type index entry, dropping the entry for
    /// `previous_type` if the type changed.
    fn put_node(&mut self, node: &Node, previous_type: Option<&str>) -> Result<(), LoomError> {
        if let Some(previous) = previous_type.filter(|p| *p != node.node_type) {
            self.node_types
                .remove((previous, node.id.0))
                .map_err(storage_err)?;
        }
        let bytes = encode(node)?;
        self.nodes
            .insert(node.id.0, bytes.as_slice())
            .map_err(storage_err)?;
        self.node_types
            .insert((node.node_type.as_str(), node.id.0), ())
            .map_err(storage_err)?;
        Ok(())
    }

    fn put_edge(&mut self, edge: &Edge, previous_type: Option<&str>) -> Result<(), LoomError> {
        if let Some(previous) = previous_type.filter(|p| *p != edge.edge_type) {
            self.edge_types
                .remove((previous, edge.id.0))
                .map_err(storage_err)?;
        }
        let bytes = encode(edge)?;
        self.edges
            .insert(edge.id.0, bytes.as_slice())
            .map_err(storage_err)?;
        self.edge_out
            .insert((edge.source_id.0, edge.id.0), ())
            .map_err(storage_err)?;
        self.edge_in
            .insert((edge.target_id.0, edge.id.0), ())
            .map_err(storage_err)?;
        self.edge_types
            .insert((edge.edge_type.as_str(), edge.id.0), ())
            .map_err(storage_err)?;
        Ok(())
    }

    fn remove_edge(&mut self, id: EdgeId) -> Result<Option<Edge>, LoomError> {
        let Some(edge) = load::<Edge>(&self.edges, id.0)? else {
            return Ok(None);
        };
        self.edges.remove(id.0).map_err(storage_err)?;
        self.edge_out
            .remove((edge.source_id.0, id.0))
            .map_err(storage_err)?;
        self.edge_in
            .remove((edge.target_id.0, id.0))
            .map_err(storage_err)?;
        self.edge_types
            .remove((edge.edge_type.as_str(), id.0))
            .map_err(storage_err)?;
        Ok(Some(edge))
    }

    fn check_endpoints(&self, draft: &NewEdge) -> Result<(), LoomError> {
        if !self.has_node(draft.source_id)? {
            return Err(LoomError::ReferentialIntegrity {
                end: EdgeEnd::Source,
                node: draft.source_id,
            });
        }
        if !self.has_node(draft.target_id)? {
            return Err(LoomError::ReferentialIntegrity {
                end: EdgeEnd::Target,
                node: draft.target_id,
            });
        }
        Ok(())
    }
}

// =============================================================================
// REDB STORE
// =============================================================================

/// A disk-backed graph store using redb.
///
/// Id counters are cached in memory and persisted in the metadata table
/// inside the same transaction as the write that consumed them.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
    next_node_id: u64,
    next_edge_id: u64,
}

impl fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbStore")
            .field("next_node_id", &self.next_node_id)
            .field("next_edge_id", &self.next_edge_id)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoomError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            WriteTables::open(&write_txn)?;
            write_txn.commit().map_err(storage_err)?;
        }

        let (next_node_id, next_edge_id) = {
            let read_txn = db.begin_read().map_err(storage_err)?;
            let table = read_txn.open_table(METADATA).map_err(storage_err)?;
            let counter = |key: &str| -> Result<u64, LoomError> {
                Ok(table
                    .get(key)
                    .map_err(storage_err)?
                    .map(|v| v.value())
                    .unwrap_or(0))
            };
            (counter(NEXT_NODE_ID)?, counter(NEXT_EDGE_ID)?)
        };

        tracing::debug!(
            path = %path.as_ref().display(),
            next_node_id,
            next_edge_id,
            "opened redb graph store"
        );

        Ok(Self {
            db,
            next_node_id,
            next_edge_id,
        })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), LoomError> {
        self.db.compact().map_err(storage_err)?;
        Ok(())
    }

    fn read_txn(&self) -> Result<ReadTransaction, LoomError> {
        self.db.begin_read().map_err(storage_err)
    }

    /// Run `apply` inside one write transaction. Commits on success,
    /// aborts on error so nothing partial is persisted.
    fn write<T>(
        &self,
        apply: impl FnOnce(&mut WriteTables<'_>) -> Result<T, LoomError>,
    ) -> Result<T, LoomError> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let result = {
            let mut tables = WriteTables::open(&txn)?;
            apply(&mut tables)
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(storage_err)?;
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(storage_err)?;
                Err(e)
            }
        }
    }
}

// =============================================================================
// GRAPHSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl GraphStore for RedbStore {
    fn create_node(&mut self, draft: NewNode) -> Result<Node, LoomError> {
        draft.validate()?;
        let id = NodeId(self.next_node_id);
        let next = self.next_node_id.saturating_add(1);
        let node = build_node(id, draft, write_time(None));

        self.write(|t| {
            t.put_node(&node, None)?;
            t.set_counter(NEXT_NODE_ID, next)
        })?;

        // Update in-memory state only after successful commit.
        self.next_node_id = next;
        Ok(node)
    }

    fn create_nodes(&mut self, drafts: Vec<NewNode>) -> Result<Vec<Node>, LoomError> {
        validate_batch_len(drafts.len())?;
        for draft in &drafts {
            draft.validate()?;
        }
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let at = write_time(None);
        let mut next = self.next_node_id;
        let nodes: Vec<Node> = drafts
            .into_iter()
            .map(|draft| {
                let id = NodeId(next);
                next = next.saturating_add(1);
                build_node(id, draft, at)
            })
            .collect();

        self.write(|t| {
            for node in &nodes {
                t.put_node(node, None)?;
            }
            t.set_counter(NEXT_NODE_ID, next)
        })?;

        self.next_node_id = next;
        Ok(nodes)
    }

    fn get_node(&self, id: NodeId) -> Result<Option<Node>, LoomError> {
        let txn = self.read_txn()?;
        let nodes = txn.open_table(NODES).map_err(storage_err)?;
        load(&nodes, id.0)
    }

    fn contains_node(&self, id: NodeId) -> Result<bool, LoomError> {
        let txn = self.read_txn()?;
        let nodes = txn.open_table(NODES).map_err(storage_err)?;
        Ok(nodes.get(id.0).map_err(storage_err)?.is_some())
    }

    fn query_nodes(&self, filter: &NodeFilter) -> Result<Vec<Node>, LoomError> {
        filter.validate()?;
        let txn = self.read_txn()?;
        let nodes = txn.open_table(NODES).map_err(storage_err)?;

        let candidates = match filter.node_type.as_deref() {
            Some(node_type) => {
                let index = txn.open_table(NODE_TYPE_INDEX).map_err(storage_err)?;
                load_ids(&nodes, &typed_ids(&index, node_type)?)?
            }
            None => load_all(&nodes)?,
        };
        Ok(finish_node_query(candidates, filter))
    }

    fn update_node(&mut self, id: NodeId, patch: NodePatch) -> Result<Option<Node>, LoomError> {
        self.write(|t| {
            let Some(mut node) = load::<Node>(&t.nodes, id.0)? else {
                return Ok(None);
            };
            apply_node_patch(&mut node, patch);
            t.put_node(&node, None)?;
            Ok(Some(node))
        })
    }

    fn replace_node(&mut self, id: NodeId, draft: NewNode) -> Result<Option<Node>, LoomError> {
        draft.validate()?;
        self.write(|t| {
            let Some(mut node) = load::<Node>(&t.nodes, id.0)? else {
                return Ok(None);
            };
            let previous_type = std::mem::replace(&mut node.node_type, draft.node_type);
            node.label = draft.label;
            node.properties = draft.properties;
            node.updated_at = write_time(Some(node.created_at));
            t.put_node(&node, Some(&previous_type))?;
            Ok(Some(node))
        })
    }

    fn delete_node(&mut self, id: NodeId) -> Result<Option<DeletedNode>, LoomError> {
        self.write(|t| {
            let Some(node) = load::<Node>(&t.nodes, id.0)? else {
                return Ok(None);
            };

            // A self-loop sits in both indices; the union counts it once.
            let touching: BTreeSet<u64> = adjacent_ids(&t.edge_out, id.0)?
                .into_iter()
                .chain(adjacent_ids(&t.edge_in, id.0)?)
                .collect();

            let mut deleted_edge_count = 0;
            for edge_id in touching {
                if t.remove_edge(EdgeId(edge_id))?.is_some() {
                    deleted_edge_count += 1;
                }
            }

            t.embeddings.remove(id.0).map_err(storage_err)?;
            t.node_types
                .remove((node.node_type.as_str(), id.0))
                .map_err(storage_err)?;
            t.nodes.remove(id.0).map_err(storage_err)?;

            Ok(Some(DeletedNode {
                id,
                deleted_edge_count,
            }))
        })
    }

    fn create_edge(&mut self, draft: NewEdge) -> Result<Edge, LoomError> {
        draft.validate()?;
        let id = EdgeId(self.next_edge_id);
        let next = self.next_edge_id.saturating_add(1);

        let edge = self.write(|t| {
            t.check_endpoints(&draft)?;
            let edge = build_edge(id, draft, write_time(None));
            t.put_edge(&edge, None)?;
            t.set_counter(NEXT_EDGE_ID, next)?;
            Ok(edge)
        })?;

        self.next_edge_id = next;
        Ok(edge)
    }

    fn create_edges(&mut self, drafts: Vec<NewEdge>) -> Result<Vec<Edge>, LoomError> {
        validate_batch_len(drafts.len())?;
        for draft in &drafts {
            draft.validate()?;
        }
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let start = self.next_edge_id;
        let (edges, next) = self.write(|t| {
            let at = write_time(None);
            let mut next = start;
            let mut edges = Vec::with_capacity(drafts.len());
            for draft in drafts {
                t.check_endpoints(&draft)?;
                let edge = build_edge(EdgeId(next), draft, at);
                next = next.saturating_add(1);
                t.put_edge(&edge, None)?;
                edges.push(edge);
            }
            t.set_counter(NEXT_EDGE_ID, next)?;
            Ok((edges, next))
        })?;

        self.next_edge_id = next;
        Ok(edges)
    }

    fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>, LoomError> {
        let txn = self.read_txn()?;
        let edges = txn.open_table(EDGES).map_err(storage_err)?;
        load(&edges, id.0)
    }

    fn query_edges(&self, filter: &EdgeFilter) -> Result<Vec<Edge>, LoomError> {
        filter.validate()?;
        let txn = self.read_txn()?;
        let edges = txn.open_table(EDGES).map_err(storage_err)?;

        // Narrow with the most selective index available; the shared
        // finisher re-applies every predicate.
        let candidates = match (filter.source_id, filter.target_id, filter.edge_type.as_deref()) {
            (Some(source), _, _) => {
                let index = txn.open_table(EDGE_OUT).map_err(storage_err)?;
                load_ids(&edges, &adjacent_ids(&index, source.0)?)?
            }
            (None, Some(target), _) => {
                let index = txn.open_table(EDGE_IN).map_err(storage_err)?;
                load_ids(&edges, &adjacent_ids(&index, target.0)?)?
            }
            (None, None, Some(edge_type)) => {
                let index = txn.open_table(EDGE_TYPE_INDEX).map_err(storage_err)?;
                load_ids(&edges, &typed_ids(&index, edge_type)?)?
            }
            (None, None, None) => load_all(&edges)?,
        };
        Ok(finish_edge_query(candidates, filter))
    }

    fn update_edge(&mut self, id: EdgeId, patch: EdgePatch) -> Result<Option<Edge>, LoomError> {
        patch.validate()?;
        self.write(|t| {
            let Some(mut edge) = load::<Edge>(&t.edges, id.0)? else {
                return Ok(None);
            };
            let previous_type = edge.edge_type.clone();
            apply_edge_patch(&mut edge, patch);
            t.put_edge(&edge, Some(&previous_type))?;
            Ok(Some(edge))
        })
    }

    fn delete_edge(&mut self, id: EdgeId) -> Result<Option<Edge>, LoomError> {
        self.write(|t| t.remove_edge(id))
    }

    fn outgoing_edges(&self, id: NodeId) -> Result<Vec<Edge>, LoomError> {
        let txn = self.read_txn()?;
        let edges = txn.open_table(EDGES).map_err(storage_err)?;
        let index = txn.open_table(EDGE_OUT).map_err(storage_err)?;
        load_ids(&edges, &adjacent_ids(&index, id.0)?)
    }

    fn incoming_edges(&self, id: NodeId) -> Result<Vec<Edge>, LoomError> {
        let txn = self.read_txn()?;
        let edges = txn.open_table(EDGES).map_err(storage_err)?;
        let index = txn.open_table(EDGE_IN).map_err(storage_err)?;
        load_ids(&edges, &adjacent_ids(&index, id.0)?)
    }

    fn put_embedding(&mut self, id: NodeId, embedding: NodeEmbedding) -> Result<bool, LoomError> {
        let bytes = encode(&embedding)?;
        self.write(|t| {
            if !t.has_node(id)? {
                return Ok(false);
            }
            t.embeddings
                .insert(id.0, bytes.as_slice())
                .map_err(storage_err)?;
            Ok(true)
        })
    }

    fn embedding_for(&self, id: NodeId) -> Result<Option<NodeEmbedding>, LoomError> {
        let txn = self.read_txn()?;
        let embeddings = txn.open_table(EMBEDDINGS).map_err(storage_err)?;
        load(&embeddings, id.0)
    }

    fn embeddings(&self) -> Result<Vec<(NodeId, NodeEmbedding)>, LoomError> {
        let txn = self.read_txn()?;
        let table = txn.open_table(EMBEDDINGS).map_err(storage_err)?;

        let mut all = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (key, bytes) = entry.map_err(storage_err)?;
            all.push((NodeId(key.value()), decode(bytes.value())?));
        }
        Ok(all)
    }

    fn node_count(&self) -> Result<usize, LoomError> {
        let txn = self.read_txn()?;
        let nodes = txn.open_table(NODES).map_err(storage_err)?;
        let count = nodes.len().map_err(storage_err)?;
        Ok(count as usize)
    }

    fn edge_count(&self) -> Result<usize, LoomError> {
        let txn = self.read_txn()?;
        let edges = txn.open_table(EDGES).map_err(storage_err)?;
        let count = edges.len().map_err(storage_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::PropertyValue;
    use chrono::Utc;
    use tempfile::tempdir;

    fn embedding(vector: Vec<f32>) -> NodeEmbedding {
        NodeEmbedding {
            model: "simple-v1".into(),
            provider: "simple".into(),
            vector,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn basic_operations() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");

        let a = store
            .create_node(NewNode::new("Component", "Login"))
            .expect("create node");
        let b = store
            .create_node(NewNode::new("Service", "Auth"))
            .expect("create node");
        assert_ne!(a.id, b.id);
        assert_eq!(store.node_count().expect("count"), 2);

        let edge = store
            .create_edge(NewEdge::new(a.id, b.id, "calls").with_weight(0.5))
            .expect("create edge");
        assert_eq!(store.edge_count().expect("count"), 1);
        assert_eq!(
            store.get_edge(edge.id).expect("get edge"),
            Some(edge.clone())
        );
        assert_eq!(store.outgoing_edges(a.id).expect("out"), vec![edge.clone()]);
        assert_eq!(store.incoming_edges(b.id).expect("in"), vec![edge]);
    }

    #[test]
    fn round_trips_nested_properties() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");

        let props = crate::properties_from_json(serde_json::json!({
            "tags": ["auth", "ui"],
            "config": {"timeout": 5000, "ratio": 0.25, "enabled": true},
            "note": null
        }))
        .expect("props");
        let node = store
            .create_node(NewNode::new("Component", "Login").with_properties(props.clone()))
            .expect("create node");

        let fetched = store.get_node(node.id).expect("get").expect("present");
        assert_eq!(fetched.properties, props);
        assert_eq!(fetched.created_at, node.created_at);
    }

    #[test]
    fn edge_to_missing_node_is_rejected() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let a = store
            .create_node(NewNode::new("Component", "Login"))
            .expect("create node");

        let result = store.create_edge(NewEdge::new(a.id, NodeId(999), "calls"));
        assert!(matches!(
            result,
            Err(LoomError::ReferentialIntegrity {
                end: EdgeEnd::Target,
                node: NodeId(999)
            })
        ));
        assert_eq!(store.edge_count().expect("count"), 0);
    }

    #[test]
    fn failed_bulk_edge_write_leaves_nothing_behind() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let nodes = store
            .create_nodes(vec![NewNode::new("T", "a"), NewNode::new("T", "b")])
            .expect("bulk nodes");

        let result = store.create_edges(vec![
            NewEdge::new(nodes[0].id, nodes[1].id, "links"),
            NewEdge::new(nodes[1].id, NodeId(404), "links"),
        ]);
        assert!(result.is_err());
        assert_eq!(store.edge_count().expect("count"), 0);
        assert!(store.outgoing_edges(nodes[0].id).expect("out").is_empty());

        // The aborted batch did not consume ids.
        let edge = store
            .create_edge(NewEdge::new(nodes[0].id, nodes[1].id, "links"))
            .expect("edge");
        assert_eq!(edge.id, EdgeId(0));
    }

    #[test]
    fn delete_node_cascades_edges_and_embedding() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let a = store.create_node(NewNode::new("T", "a")).expect("node");
        let b = store.create_node(NewNode::new("T", "b")).expect("node");
        store.create_edge(NewEdge::new(a.id, b.id, "x")).expect("edge");
        store.create_edge(NewEdge::new(b.id, a.id, "y")).expect("edge");
        store.create_edge(NewEdge::new(a.id, a.id, "self")).expect("edge");
        let kept = store.create_edge(NewEdge::new(b.id, b.id, "self")).expect("edge");
        assert!(store.put_embedding(a.id, embedding(vec![1.0])).expect("put"));

        let deleted = store.delete_node(a.id).expect("delete").expect("present");
        assert_eq!(deleted.deleted_edge_count, 3);
        assert_eq!(store.edge_count().expect("count"), 1);
        assert!(store.embedding_for(a.id).expect("get").is_none());
        assert!(store.query_nodes(&NodeFilter::of_type("T")).expect("query").len() == 1);

        let remaining = store
            .query_edges(&EdgeFilter {
                edge_type: Some("self".into()),
                ..EdgeFilter::default()
            })
            .expect("query");
        assert_eq!(remaining, vec![kept]);
    }

    #[test]
    fn type_indices_follow_updates() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let a = store.create_node(NewNode::new("Draft", "a")).expect("node");
        let b = store.create_node(NewNode::new("Draft", "b")).expect("node");

        store
            .replace_node(a.id, NewNode::new("Final", "a2"))
            .expect("replace")
            .expect("present");
        assert_eq!(
            store.query_nodes(&NodeFilter::of_type("Draft")).expect("query").len(),
            1
        );
        assert_eq!(
            store.query_nodes(&NodeFilter::of_type("Final")).expect("query")[0].label,
            "a2"
        );

        let edge = store.create_edge(NewEdge::new(a.id, b.id, "old")).expect("edge");
        store
            .update_edge(
                edge.id,
                EdgePatch {
                    edge_type: Some("new".into()),
                    ..EdgePatch::default()
                },
            )
            .expect("update")
            .expect("present");
        let by_old = store
            .query_edges(&EdgeFilter {
                edge_type: Some("old".into()),
                ..EdgeFilter::default()
            })
            .expect("query");
        assert!(by_old.is_empty());
    }

    #[test]
    fn update_node_keeps_type_and_created_at() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let node = store
            .create_node(NewNode::new("Component", "Login").with_property("v", 1i64))
            .expect("node");

        let updated = store
            .update_node(
                node.id,
                NodePatch {
                    label: Some("LoginForm".into()),
                    properties: None,
                },
            )
            .expect("update")
            .expect("present");
        assert_eq!(updated.node_type, "Component");
        assert_eq!(updated.label, "LoginForm");
        assert_eq!(updated.properties.get("v"), Some(&PropertyValue::Int(1)));
        assert_eq!(updated.created_at, node.created_at);
        assert!(updated.updated_at >= node.updated_at);
    }

    #[test]
    fn query_edges_by_source_and_type() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("test.redb")).expect("open db");
        let a = store.create_node(NewNode::new("T", "a")).expect("node");
        let b = store.create_node(NewNode::new("T", "b")).expect("node");
        store.create_edge(NewEdge::new(a.id, b.id, "calls")).expect("edge");
        store.create_edge(NewEdge::new(a.id, b.id, "uses")).expect("edge");
        store.create_edge(NewEdge::new(b.id, a.id, "calls")).expect("edge");

        let found = store
            .query_edges(&EdgeFilter {
                source_id: Some(a.id),
                edge_type: Some("calls".into()),
                ..EdgeFilter::default()
            })
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target_id, b.id);
    }

    // =========================================================================
    // Recovery after reopen
    // =========================================================================

    #[test]
    fn recovery_persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        let (a, b) = {
            let mut store = RedbStore::open(&db_path).expect("open db");
            let a = store.create_node(NewNode::new("T", "a")).expect("node");
            let b = store.create_node(NewNode::new("T", "b")).expect("node");
            store
                .create_edge(NewEdge::new(a.id, b.id, "links").with_weight(2.5))
                .expect("edge");
            store
                .put_embedding(b.id, embedding(vec![0.6, 0.8]))
                .expect("embedding");
            (a.id, b.id)
        };

        let store = RedbStore::open(&db_path).expect("reopen db");
        assert_eq!(store.node_count().expect("count"), 2);
        assert_eq!(store.edge_count().expect("count"), 1);
        assert_eq!(store.outgoing_edges(a).expect("out")[0].weight, Some(2.5));
        assert_eq!(
            store.embedding_for(b).expect("get").map(|e| e.vector),
            Some(vec![0.6, 0.8])
        );
        assert_eq!(store.embeddings().expect("all").len(), 1);
    }

    #[test]
    fn recovery_ids_not_reused_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        let last = {
            let mut store = RedbStore::open(&db_path).expect("open db");
            store.create_node(NewNode::new("T", "a")).expect("node");
            let last = store.create_node(NewNode::new("T", "b")).expect("node");
            store.delete_node(last.id).expect("delete");
            last.id
        };

        let mut store = RedbStore::open(&db_path).expect("reopen db");
        let fresh = store.create_node(NewNode::new("T", "c")).expect("node");
        assert!(
            fresh.id > last,
            "New node id {} should be > previous {}",
            fresh.id,
            last
        );
    }

    #[test]
    fn recovery_compact_and_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let mut store = RedbStore::open(&db_path).expect("open db");
            let drafts = (0..50).map(|i| NewNode::new("T", format!("n{i}"))).collect();
            store.create_nodes(drafts).expect("bulk");
            store.compact().expect("compact");
        }

        let store = RedbStore::open(&db_path).expect("reopen db");
        assert_eq!(store.node_count().expect("count"), 50);
        let page = store
            .query_nodes(&NodeFilter {
                limit: Some(5),
                ..NodeFilter::default()
            })
            .expect("query");
        assert_eq!(page.len(), 5);
    }
}
