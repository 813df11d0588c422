//! # NornicDB
//!
//! An embedded graph database combining property-graph storage with a
//! tri-modal Cypher execution engine ([`query`]). This crate is the
//! embedding surface: it owns file layout and transaction lifecycle and
//! hands out snapshots the query engine executes against.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use nornicdb::{Db, Result};
//!
//! fn main() -> Result<()> {
//!     let db = Db::open("my_graph.ndb")?;
//!
//!     let mut txn = db.begin_write();
//!     txn.commit()?;
//!
//!     let snapshot = db.snapshot();
//!     let _rows = db.execute_streaming(
//!         "MATCH (n) RETURN n",
//!         &snapshot,
//!         &nornicdb::query::Params::new(),
//!     )?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Core concepts
//!
//! - [`Db`]: the entry point. Handles file management and engine
//!   initialization. Safe to share across threads.
//! - [`WriteTxn`]: exclusive access for modifying the graph.
//! - [`ReadTxn`] / [`DbSnapshot`]: consistent views of the graph for
//!   querying, non-blocking relative to writers.
//! - [`query`]: the Cypher execution engine, re-exported from
//!   `nornicdb-query`.

mod error;

use nornicdb_api::GraphStore;
use nornicdb_storage::engine::{GraphEngine, Snapshot, StorageSnapshot};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use error::{Error, Result};
pub use nornicdb_api::{
    EdgeKey, ExternalId, GraphSnapshot, InternalNodeId, LabelId, PropertyValue, RelTypeId,
};
pub use nornicdb_query as query;

/// The main database handle for NornicDB.
///
/// # Concurrency
///
/// `Db` can be shared across threads. Internal mutations are serialized
/// through a single writer lock; readers never block on it.
pub struct Db {
    engine: GraphEngine,
    ndb_path: PathBuf,
    wal_path: PathBuf,
    executor: nornicdb_query::ExecutorFactory,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("ndb_path", &self.ndb_path)
            .field("wal_path", &self.wal_path)
            .field("executor_mode", &self.executor.mode())
            .finish()
    }
}

impl Db {
    /// Opens a database at the given path.
    ///
    /// The path can be a bare name (files are created as `<path>.ndb` and
    /// `<path>.wal`) or an explicit `.ndb`/`.wal` path, in which case the
    /// other file is inferred.
    ///
    /// The query engine's executor mode and cache sizing are read from
    /// `NORNICDB_EXECUTOR_MODE`/`NORNICDB_AST_CACHE_MAX_ENTRIES`/etc. at open
    /// time (see [`nornicdb_query::Config::from_env`]). Use
    /// [`Db::open_with_config`] to set them explicitly instead.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, nornicdb_query::Config::from_env())
    }

    /// As [`Db::open`], but with an explicit query-engine [`nornicdb_query::Config`]
    /// rather than one read from the environment.
    pub fn open_with_config(path: impl AsRef<Path>, config: nornicdb_query::Config) -> Result<Self> {
        let path = path.as_ref();
        let (ndb_path, wal_path) = derive_paths(path);
        Self::open_paths_with_config(ndb_path, wal_path, config)
    }

    /// Opens a database with explicit paths for the data and log files.
    pub fn open_paths(ndb_path: impl AsRef<Path>, wal_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_paths_with_config(ndb_path, wal_path, nornicdb_query::Config::from_env())
    }

    /// As [`Db::open_paths`], but with an explicit query-engine [`nornicdb_query::Config`].
    pub fn open_paths_with_config(
        ndb_path: impl AsRef<Path>,
        wal_path: impl AsRef<Path>,
        config: nornicdb_query::Config,
    ) -> Result<Self> {
        let ndb_path = ndb_path.as_ref().to_path_buf();
        let wal_path = wal_path.as_ref().to_path_buf();
        let engine = GraphEngine::open(&ndb_path, &wal_path)?;
        let executor = nornicdb_query::ExecutorFactory::with_config(config);
        Ok(Self { engine, ndb_path, wal_path, executor })
    }

    /// The executor mode (`nornic`/`antlr`/`hybrid`) this handle dispatches
    /// queries to.
    pub fn executor_mode(&self) -> nornicdb_query::ExecutorMode {
        self.executor.mode()
    }

    /// Parses, analyzes and runs `cypher` against `snapshot`, using the
    /// executor mode this `Db` was opened with.
    pub fn execute_streaming<'a>(
        &self,
        cypher: &str,
        snapshot: &'a DbSnapshot,
        params: &'a nornicdb_query::Params,
    ) -> Result<Box<dyn Iterator<Item = nornicdb_query::Result<nornicdb_query::Row>> + 'a>> {
        self.executor
            .execute_streaming(cypher, snapshot, params)
            .map_err(|e| Error::Query(e.to_string()))
    }

    /// Parses, analyzes and runs `cypher` as a write query against `txn`,
    /// using the executor mode this `Db` was opened with.
    pub fn execute_write(
        &self,
        cypher: &str,
        snapshot: &DbSnapshot,
        txn: &mut WriteTxn<'_>,
        params: &nornicdb_query::Params,
    ) -> Result<u32> {
        self.executor
            .execute_write(cypher, snapshot, txn, params)
            .map_err(|e| Error::Query(e.to_string()))
    }

    /// Returns the path to the main data file (`.ndb`).
    #[inline]
    pub fn ndb_path(&self) -> &Path {
        &self.ndb_path
    }

    /// Returns the path to the log file (`.wal`).
    #[inline]
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    /// Begins a read-only transaction giving a consistent view of the
    /// database at the time of creation.
    pub fn begin_read(&self) -> ReadTxn {
        ReadTxn { snapshot: self.engine.begin_read() }
    }

    /// Creates a snapshot implementing [`GraphSnapshot`], suitable for use
    /// with the query engine.
    pub fn snapshot(&self) -> DbSnapshot {
        DbSnapshot(self.engine.snapshot())
    }

    /// Begins a write transaction. Write transactions are exclusive - only
    /// one can exist at a time - and must be explicitly committed.
    ///
    /// # Panics
    ///
    /// Panics if another write transaction is already in progress.
    pub fn begin_write(&self) -> WriteTxn<'_> {
        WriteTxn { inner: self.engine.begin_write() }
    }

    /// Registers an equality index on `label.field`, usable by
    /// `lookup_index` and by the query planner's index-seek path.
    pub fn create_index(&self, label: &str, field: &str) -> Result<()> {
        let mut txn = self.engine.begin_write();
        txn.create_index(label, field)?;
        txn.commit().map_err(Error::from)
    }

    /// Drops tombstoned nodes and edges from the live graph.
    pub fn compact(&self) -> Result<()> {
        self.engine.compact().map_err(Error::from)
    }
}

/// A wrapper around the storage snapshot to hide internal types.
#[derive(Debug, Clone)]
pub struct DbSnapshot(StorageSnapshot);

impl GraphSnapshot for DbSnapshot {
    type Neighbors<'a> = Box<dyn Iterator<Item = EdgeKey> + 'a>;

    fn neighbors(&self, src: InternalNodeId, rel: Option<RelTypeId>) -> Self::Neighbors<'_> {
        self.0.neighbors(src, rel)
    }

    fn incoming_neighbors(&self, dst: InternalNodeId, rel: Option<RelTypeId>) -> Self::Neighbors<'_> {
        self.0.incoming_neighbors(dst, rel)
    }

    fn nodes(&self) -> Box<dyn Iterator<Item = InternalNodeId> + '_> {
        self.0.nodes()
    }

    fn lookup_index(&self, label: &str, field: &str, value: &PropertyValue) -> Option<Vec<InternalNodeId>> {
        self.0.lookup_index(label, field, value)
    }

    fn resolve_external(&self, iid: InternalNodeId) -> Option<ExternalId> {
        self.0.resolve_external(iid)
    }

    fn node_label(&self, iid: InternalNodeId) -> Option<LabelId> {
        self.0.node_label(iid)
    }

    fn resolve_node_labels(&self, iid: InternalNodeId) -> Option<Vec<LabelId>> {
        self.0.resolve_node_labels(iid)
    }

    fn is_tombstoned_node(&self, iid: InternalNodeId) -> bool {
        self.0.is_tombstoned_node(iid)
    }

    fn node_property(&self, iid: InternalNodeId, key: &str) -> Option<PropertyValue> {
        self.0.node_property(iid, key)
    }

    fn edge_property(&self, edge: EdgeKey, key: &str) -> Option<PropertyValue> {
        self.0.edge_property(edge, key)
    }

    fn node_properties(&self, iid: InternalNodeId) -> Option<BTreeMap<String, PropertyValue>> {
        self.0.node_properties(iid)
    }

    fn edge_properties(&self, edge: EdgeKey) -> Option<BTreeMap<String, PropertyValue>> {
        self.0.edge_properties(edge)
    }

    fn resolve_label_id(&self, name: &str) -> Option<LabelId> {
        self.0.resolve_label_id(name)
    }

    fn resolve_rel_type_id(&self, name: &str) -> Option<RelTypeId> {
        self.0.resolve_rel_type_id(name)
    }

    fn resolve_label_name(&self, id: LabelId) -> Option<String> {
        self.0.resolve_label_name(id)
    }

    fn resolve_rel_type_name(&self, id: RelTypeId) -> Option<String> {
        self.0.resolve_rel_type_name(id)
    }

    fn node_count(&self, label: Option<LabelId>) -> u64 {
        self.0.node_count(label)
    }

    fn edge_count(&self, rel: Option<RelTypeId>) -> u64 {
        self.0.edge_count(rel)
    }
}

/// A read-only transaction. Created by [`Db::begin_read()`].
#[derive(Debug, Clone)]
pub struct ReadTxn {
    snapshot: Snapshot,
}

impl ReadTxn {
    /// Gets outgoing neighbors of a node, optionally filtered by
    /// relationship type.
    pub fn neighbors(&self, src: InternalNodeId, rel: Option<RelTypeId>) -> impl Iterator<Item = EdgeKey> + '_ {
        self.snapshot.neighbors(src, rel)
    }
}

/// A write transaction. Created by [`Db::begin_write()`]. Modifications are
/// buffered until `commit()` is called, which consumes the transaction.
pub struct WriteTxn<'a> {
    inner: nornicdb_storage::engine::WriteTxn<'a>,
}

impl WriteTxn<'_> {
    /// Creates a new node with the given external ID and label, returning
    /// its internal node ID.
    pub fn create_node(&mut self, external_id: ExternalId, label_id: LabelId) -> Result<InternalNodeId> {
        self.inner.create_node(external_id, label_id).map_err(Error::from)
    }

    pub fn add_node_label(&mut self, node: InternalNodeId, label_id: LabelId) {
        self.inner.add_node_label(node, label_id);
    }

    pub fn remove_node_label(&mut self, node: InternalNodeId, label_id: LabelId) {
        self.inner.remove_node_label(node, label_id);
    }

    /// Creates a directed edge from `src` to `dst` typed `rel`.
    pub fn create_edge(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId) {
        self.inner.create_edge(src, rel, dst);
    }

    /// Soft-deletes a node. It becomes invisible to queries; its data is
    /// retained until `Db::compact()` removes it.
    pub fn tombstone_node(&mut self, node: InternalNodeId) {
        self.inner.tombstone_node(node);
    }

    /// Soft-deletes an edge.
    pub fn tombstone_edge(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId) {
        self.inner.tombstone_edge(src, rel, dst);
    }

    /// Sets a property on a node, overwriting any existing value.
    pub fn set_node_property(&mut self, node: InternalNodeId, key: String, value: PropertyValue) -> Result<()> {
        self.inner.set_node_property(node, key, value);
        Ok(())
    }

    /// Sets a property on an edge, overwriting any existing value.
    pub fn set_edge_property(
        &mut self,
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
        key: String,
        value: PropertyValue,
    ) -> Result<()> {
        self.inner.set_edge_property(src, rel, dst, key, value);
        Ok(())
    }

    /// Removes a property from a node. A no-op if it doesn't exist.
    pub fn remove_node_property(&mut self, node: InternalNodeId, key: &str) -> Result<()> {
        self.inner.remove_node_property(node, key);
        Ok(())
    }

    /// Removes a property from an edge. A no-op if it doesn't exist.
    pub fn remove_edge_property(
        &mut self,
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
        key: &str,
    ) -> Result<()> {
        self.inner.remove_edge_property(src, rel, dst, key);
        Ok(())
    }

    /// Interns `name` as a label, returning its ID, creating it if absent.
    pub fn get_or_create_label(&mut self, name: &str) -> Result<LabelId> {
        self.inner.get_or_create_label(name).map_err(Error::from)
    }

    /// Interns `name` as a relationship type, returning its ID.
    pub fn get_or_create_rel_type(&mut self, name: &str) -> Result<RelTypeId> {
        self.inner.get_or_create_rel_type(name).map_err(Error::from)
    }

    /// Commits the transaction: mutations become durable and visible to
    /// new read transactions.
    pub fn commit(self) -> Result<()> {
        self.inner.commit().map_err(Error::from)
    }
}

fn derive_paths(path: &Path) -> (PathBuf, PathBuf) {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ndb") => (path.to_path_buf(), path.with_extension("wal")),
        Some("wal") => (path.with_extension("ndb"), path.to_path_buf()),
        _ => (path.with_extension("ndb"), path.with_extension("wal")),
    }
}

/// Bridges this crate's `WriteTxn` into the query engine's write
/// collaborator trait.
impl nornicdb_query::WriteableGraph for WriteTxn<'_> {
    fn create_node(&mut self, external_id: ExternalId, label_id: LabelId) -> nornicdb_query::Result<InternalNodeId> {
        self.inner.create_node(external_id, label_id).map_err(|e| nornicdb_query::Error::Storage(e.to_string()))
    }

    fn add_node_label(&mut self, node: InternalNodeId, label_id: LabelId) -> nornicdb_query::Result<()> {
        self.inner.add_node_label(node, label_id);
        Ok(())
    }

    fn remove_node_label(&mut self, node: InternalNodeId, label_id: LabelId) -> nornicdb_query::Result<()> {
        self.inner.remove_node_label(node, label_id);
        Ok(())
    }

    fn create_edge(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId) -> nornicdb_query::Result<()> {
        self.inner.create_edge(src, rel, dst);
        Ok(())
    }

    fn set_node_property(&mut self, node: InternalNodeId, key: String, value: PropertyValue) -> nornicdb_query::Result<()> {
        self.inner.set_node_property(node, key, value);
        Ok(())
    }

    fn set_edge_property(
        &mut self,
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
        key: String,
        value: PropertyValue,
    ) -> nornicdb_query::Result<()> {
        self.inner.set_edge_property(src, rel, dst, key, value);
        Ok(())
    }

    fn remove_node_property(&mut self, node: InternalNodeId, key: &str) -> nornicdb_query::Result<()> {
        self.inner.remove_node_property(node, key);
        Ok(())
    }

    fn remove_edge_property(
        &mut self,
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
        key: &str,
    ) -> nornicdb_query::Result<()> {
        self.inner.remove_edge_property(src, rel, dst, key);
        Ok(())
    }

    fn tombstone_node(&mut self, node: InternalNodeId) -> nornicdb_query::Result<()> {
        self.inner.tombstone_node(node);
        Ok(())
    }

    fn tombstone_edge(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId) -> nornicdb_query::Result<()> {
        self.inner.tombstone_edge(src, rel, dst);
        Ok(())
    }

    fn get_or_create_label_id(&mut self, name: &str) -> nornicdb_query::Result<LabelId> {
        self.inner.get_or_create_label(name).map_err(|e| nornicdb_query::Error::Storage(e.to_string()))
    }

    fn get_or_create_rel_type_id(&mut self, name: &str) -> nornicdb_query::Result<RelTypeId> {
        self.inner.get_or_create_rel_type(name).map_err(|e| nornicdb_query::Error::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_write_then_streaming_round_trips_through_db() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("test")).unwrap();
        let snapshot = db.snapshot();
        let params = nornicdb_query::Params::new();

        let mut txn = db.begin_write();
        let written = db
            .execute_write("CREATE (n:Person {name: 'Ada'})", &snapshot, &mut txn, &params)
            .unwrap();
        assert_eq!(written, 1);
        txn.commit().unwrap();

        let snapshot = db.snapshot();
        let rows: Vec<_> = db
            .execute_streaming("MATCH (n:Person) RETURN n.name AS name", &snapshot, &params)
            .unwrap()
            .collect::<nornicdb_query::Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn open_with_config_selects_executor_mode() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open_with_config(
            dir.path().join("test"),
            nornicdb_query::Config {
                executor_mode: nornicdb_query::ExecutorMode::Antlr,
                ..nornicdb_query::Config::default()
            },
        )
        .unwrap();
        assert_eq!(db.executor_mode(), nornicdb_query::ExecutorMode::Antlr);
    }
}
