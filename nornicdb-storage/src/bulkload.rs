//! Offline bulk loader used by the `ndb-import` CLI.
//!
//! Stages nodes and edges in memory and applies them as a single write
//! transaction on `commit()`, resolving external IDs and label/rel-type
//! names as it goes.

use crate::engine::GraphEngine;
use crate::error::Result;
use nornicdb_api::{ExternalId, PropertyValue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A node to be bulk-loaded into the database.
#[derive(Debug, Clone)]
pub struct BulkNode {
    pub external_id: ExternalId,
    pub label: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

/// An edge to be bulk-loaded into the database.
#[derive(Debug, Clone)]
pub struct BulkEdge {
    pub src_external_id: ExternalId,
    pub rel_type: String,
    pub dst_external_id: ExternalId,
    pub properties: BTreeMap<String, PropertyValue>,
}

pub struct BulkLoader {
    engine: GraphEngine,
    nodes: Vec<BulkNode>,
    edges: Vec<BulkEdge>,
}

impl BulkLoader {
    /// Opens a fresh database at `output_path` for bulk loading. The path
    /// must not already exist.
    pub fn new(output_path: impl AsRef<Path>) -> Result<Self> {
        let output_path = output_path.as_ref().to_path_buf();
        if output_path.exists() {
            return Err(crate::error::Error::OutputExists(output_path.display().to_string()));
        }
        let ndb_path: PathBuf = output_path.clone();
        let wal_path = output_path.with_extension("wal");
        let engine = GraphEngine::open(&ndb_path, &wal_path)?;
        Ok(Self { engine, nodes: Vec::new(), edges: Vec::new() })
    }

    pub fn add_node(&mut self, node: BulkNode) -> Result<()> {
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_edge(&mut self, edge: BulkEdge) -> Result<()> {
        self.edges.push(edge);
        Ok(())
    }

    /// Applies every staged node and edge as one write transaction.
    pub fn commit(mut self) -> Result<()> {
        let mut txn = self.engine.begin_write();
        let mut resolved = std::collections::HashMap::new();

        for node in self.nodes.drain(..) {
            let label_id = txn.get_or_create_label(&node.label)?;
            let iid = txn.create_node(node.external_id, label_id)?;
            for (key, value) in node.properties {
                txn.set_node_property(iid, key, value);
            }
            resolved.insert(node.external_id, iid);
        }

        for edge in self.edges.drain(..) {
            let src = *resolved
                .get(&edge.src_external_id)
                .ok_or(crate::error::Error::NoSuchNode(0))?;
            let dst = *resolved
                .get(&edge.dst_external_id)
                .ok_or(crate::error::Error::NoSuchNode(0))?;
            let rel_id = txn.get_or_create_rel_type(&edge.rel_type)?;
            txn.create_edge(src, rel_id, dst);
            for (key, value) in edge.properties {
                txn.set_edge_property(src, rel_id, dst, key, value);
            }
        }

        txn.commit()
    }
}
