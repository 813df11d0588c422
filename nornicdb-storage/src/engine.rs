//! A minimal, fully in-memory graph engine with an append-only log for
//! crash recovery.
//!
//! The storage engine is a named-interface collaborator for the query
//! layer, not the focus of this crate: it provides exactly the
//! `GraphStore`/`GraphSnapshot` surface the query engine needs, backed by a
//! plain `HashMap`-based graph and a length-prefixed, checksummed log file
//! instead of a page cache, B-tree indexes, or a real write-ahead log.

use crate::error::{Error, Result};
use nornicdb_api::{EdgeKey, ExternalId, GraphSnapshot, GraphStore, InternalNodeId, LabelId, PropertyValue, RelTypeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeData {
    external_id: ExternalId,
    labels: Vec<LabelId>,
    properties: BTreeMap<String, PropertyValue>,
    tombstoned: bool,
}

#[derive(Debug, Clone, Default)]
struct GraphData {
    next_node_id: InternalNodeId,
    nodes: HashMap<InternalNodeId, NodeData>,
    e2i: HashMap<ExternalId, InternalNodeId>,
    out_edges: HashMap<InternalNodeId, Vec<EdgeKey>>,
    in_edges: HashMap<InternalNodeId, Vec<EdgeKey>>,
    edge_properties: HashMap<EdgeKey, BTreeMap<String, PropertyValue>>,
    tombstoned_edges: HashSet<EdgeKey>,
    labels: HashMap<String, LabelId>,
    label_names: HashMap<LabelId, String>,
    next_label_id: LabelId,
    rel_types: HashMap<String, RelTypeId>,
    rel_type_names: HashMap<RelTypeId, String>,
    next_rel_type_id: RelTypeId,
    indexed_fields: HashSet<(LabelId, String)>,
}

impl GraphData {
    fn is_node_live(&self, iid: InternalNodeId) -> bool {
        self.nodes.get(&iid).is_some_and(|n| !n.tombstoned)
    }

    fn is_edge_visible(&self, edge: &EdgeKey) -> bool {
        !self.tombstoned_edges.contains(edge) && self.is_node_live(edge.src) && self.is_node_live(edge.dst)
    }
}

/// A single mutation, framed and checksummed on disk so a torn write at the
/// tail of the log is detected and dropped rather than corrupting state.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogRecord {
    CreateNode {
        external_id: ExternalId,
        internal_id: InternalNodeId,
        label: LabelId,
    },
    AddNodeLabel {
        node: InternalNodeId,
        label: LabelId,
    },
    RemoveNodeLabel {
        node: InternalNodeId,
        label: LabelId,
    },
    CreateEdge {
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
    },
    SetNodeProperty {
        node: InternalNodeId,
        key: String,
        value: PropertyValue,
    },
    SetEdgeProperty {
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
        key: String,
        value: PropertyValue,
    },
    RemoveNodeProperty {
        node: InternalNodeId,
        key: String,
    },
    RemoveEdgeProperty {
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
        key: String,
    },
    TombstoneNode {
        node: InternalNodeId,
    },
    TombstoneEdge {
        src: InternalNodeId,
        rel: RelTypeId,
        dst: InternalNodeId,
    },
    InternLabel {
        name: String,
        id: LabelId,
    },
    InternRelType {
        name: String,
        id: RelTypeId,
    },
    CreateIndex {
        label: LabelId,
        field: String,
    },
}

fn apply_record(data: &mut GraphData, record: &LogRecord) {
    match record {
        LogRecord::CreateNode { external_id, internal_id, label } => {
            data.nodes.insert(
                *internal_id,
                NodeData { external_id: *external_id, labels: vec![*label], properties: BTreeMap::new(), tombstoned: false },
            );
            data.e2i.insert(*external_id, *internal_id);
            data.next_node_id = data.next_node_id.max(*internal_id + 1);
        }
        LogRecord::AddNodeLabel { node, label } => {
            if let Some(n) = data.nodes.get_mut(node) {
                if !n.labels.contains(label) {
                    n.labels.push(*label);
                }
            }
        }
        LogRecord::RemoveNodeLabel { node, label } => {
            if let Some(n) = data.nodes.get_mut(node) {
                n.labels.retain(|l| l != label);
            }
        }
        LogRecord::CreateEdge { src, rel, dst } => {
            let key = EdgeKey { src: *src, rel: *rel, dst: *dst };
            data.out_edges.entry(*src).or_default().push(key);
            data.in_edges.entry(*dst).or_default().push(key);
        }
        LogRecord::SetNodeProperty { node, key, value } => {
            if let Some(n) = data.nodes.get_mut(node) {
                n.properties.insert(key.clone(), value.clone());
            }
        }
        LogRecord::SetEdgeProperty { src, rel, dst, key, value } => {
            let edge = EdgeKey { src: *src, rel: *rel, dst: *dst };
            data.edge_properties.entry(edge).or_default().insert(key.clone(), value.clone());
        }
        LogRecord::RemoveNodeProperty { node, key } => {
            if let Some(n) = data.nodes.get_mut(node) {
                n.properties.remove(key);
            }
        }
        LogRecord::RemoveEdgeProperty { src, rel, dst, key } => {
            let edge = EdgeKey { src: *src, rel: *rel, dst: *dst };
            if let Some(props) = data.edge_properties.get_mut(&edge) {
                props.remove(key);
            }
        }
        LogRecord::TombstoneNode { node } => {
            if let Some(n) = data.nodes.get_mut(node) {
                n.tombstoned = true;
            }
        }
        LogRecord::TombstoneEdge { src, rel, dst } => {
            data.tombstoned_edges.insert(EdgeKey { src: *src, rel: *rel, dst: *dst });
        }
        LogRecord::InternLabel { name, id } => {
            data.labels.insert(name.clone(), *id);
            data.label_names.insert(*id, name.clone());
            data.next_label_id = data.next_label_id.max(*id + 1);
        }
        LogRecord::InternRelType { name, id } => {
            data.rel_types.insert(name.clone(), *id);
            data.rel_type_names.insert(*id, name.clone());
            data.next_rel_type_id = data.next_rel_type_id.max(*id + 1);
        }
        LogRecord::CreateIndex { label, field } => {
            data.indexed_fields.insert((*label, field.clone()));
        }
    }
}

fn write_record(file: &mut File, record: &LogRecord) -> Result<()> {
    let payload = serde_json::to_vec(record).map_err(|e| Error::Other(e.to_string()))?;
    let checksum = crc32fast::hash(&payload);
    file.write_all(&(payload.len() as u32).to_le_bytes())?;
    file.write_all(&checksum.to_le_bytes())?;
    file.write_all(&payload)?;
    Ok(())
}

/// Reads every well-formed record from the log, truncating the file at the
/// first torn or corrupt frame instead of failing the whole open.
fn replay(file: &mut File) -> Result<GraphData> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut data = GraphData::default();
    let mut pos = 0usize;
    let mut valid_upto = 0usize;
    while pos + 8 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().expect("checked")) as usize;
        let checksum = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().expect("checked"));
        let body_start = pos + 8;
        if body_start + len > bytes.len() {
            break;
        }
        let payload = &bytes[body_start..body_start + len];
        if crc32fast::hash(payload) != checksum {
            break;
        }
        let record: LogRecord = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(_) => break,
        };
        apply_record(&mut data, &record);
        pos = body_start + len;
        valid_upto = pos;
    }

    if valid_upto != bytes.len() {
        file.set_len(valid_upto as u64)?;
        file.seek(SeekFrom::End(0))?;
    }
    Ok(data)
}

/// A read-only, point-in-time view of the graph. Cheap to clone: it shares
/// the underlying snapshot data via `Arc`.
#[derive(Debug, Clone)]
pub struct Snapshot(Arc<GraphData>);

impl Snapshot {
    pub fn neighbors(&self, src: InternalNodeId, rel: Option<RelTypeId>) -> impl Iterator<Item = EdgeKey> + '_ {
        self.0
            .out_edges
            .get(&src)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |e| rel.is_none_or(|r| e.rel == r))
            .filter(|e| self.0.is_edge_visible(e))
    }

    pub fn incoming_neighbors(&self, dst: InternalNodeId, rel: Option<RelTypeId>) -> impl Iterator<Item = EdgeKey> + '_ {
        self.0
            .in_edges
            .get(&dst)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |e| rel.is_none_or(|r| e.rel == r))
            .filter(|e| self.0.is_edge_visible(e))
    }

    pub fn nodes(&self) -> impl Iterator<Item = InternalNodeId> + '_ {
        self.0.nodes.iter().filter(|(_, n)| !n.tombstoned).map(|(iid, _)| *iid)
    }

    pub fn resolve_external(&self, iid: InternalNodeId) -> Option<ExternalId> {
        self.0.nodes.get(&iid).map(|n| n.external_id)
    }

    pub fn lookup_internal_id(&self, external_id: ExternalId) -> Option<InternalNodeId> {
        self.0.e2i.get(&external_id).copied()
    }

    pub fn node_label(&self, iid: InternalNodeId) -> Option<LabelId> {
        self.0.nodes.get(&iid).and_then(|n| n.labels.first().copied())
    }

    pub fn resolve_node_labels(&self, iid: InternalNodeId) -> Option<Vec<LabelId>> {
        self.0.nodes.get(&iid).map(|n| n.labels.clone())
    }

    pub fn is_tombstoned_node(&self, iid: InternalNodeId) -> bool {
        self.0.nodes.get(&iid).map(|n| n.tombstoned).unwrap_or(false)
    }

    pub fn node_property(&self, iid: InternalNodeId, key: &str) -> Option<PropertyValue> {
        self.0.nodes.get(&iid).and_then(|n| n.properties.get(key).cloned())
    }

    pub fn edge_property(&self, edge: EdgeKey, key: &str) -> Option<PropertyValue> {
        self.0.edge_properties.get(&edge).and_then(|p| p.get(key).cloned())
    }

    pub fn node_properties(&self, iid: InternalNodeId) -> Option<BTreeMap<String, PropertyValue>> {
        self.0.nodes.get(&iid).map(|n| n.properties.clone())
    }

    pub fn edge_properties(&self, edge: EdgeKey) -> Option<BTreeMap<String, PropertyValue>> {
        self.0.edge_properties.get(&edge).cloned()
    }

    pub fn resolve_label_id(&self, name: &str) -> Option<LabelId> {
        self.0.labels.get(name).copied()
    }

    pub fn resolve_rel_type_id(&self, name: &str) -> Option<RelTypeId> {
        self.0.rel_types.get(name).copied()
    }

    pub fn resolve_label_name(&self, id: LabelId) -> Option<String> {
        self.0.label_names.get(&id).cloned()
    }

    pub fn resolve_rel_type_name(&self, id: RelTypeId) -> Option<String> {
        self.0.rel_type_names.get(&id).cloned()
    }

    pub fn node_count(&self, label: Option<LabelId>) -> u64 {
        self.0
            .nodes
            .values()
            .filter(|n| !n.tombstoned)
            .filter(|n| label.is_none_or(|l| n.labels.contains(&l)))
            .count() as u64
    }

    pub fn edge_count(&self, rel: Option<RelTypeId>) -> u64 {
        self.0
            .out_edges
            .values()
            .flatten()
            .filter(|e| rel.is_none_or(|r| e.rel == r))
            .filter(|e| self.0.is_edge_visible(e))
            .count() as u64
    }

    pub fn lookup_index(&self, label: &str, field: &str, value: &PropertyValue) -> Option<Vec<InternalNodeId>> {
        let label_id = self.resolve_label_id(label)?;
        if !self.0.indexed_fields.contains(&(label_id, field.to_string())) {
            return None;
        }
        Some(
            self.0
                .nodes
                .iter()
                .filter(|(_, n)| !n.tombstoned && n.labels.contains(&label_id))
                .filter(|(_, n)| n.properties.get(field) == Some(value))
                .map(|(iid, _)| *iid)
                .collect(),
        )
    }
}

/// Newtype wrapping [`Snapshot`] to implement the `nornicdb_api::GraphSnapshot`
/// trait without leaking the inherent-method API into the trait's surface.
#[derive(Debug, Clone)]
pub struct StorageSnapshot(pub Snapshot);

impl GraphSnapshot for StorageSnapshot {
    type Neighbors<'a> = Box<dyn Iterator<Item = EdgeKey> + 'a>;

    fn neighbors(&self, src: InternalNodeId, rel: Option<RelTypeId>) -> Self::Neighbors<'_> {
        Box::new(self.0.neighbors(src, rel))
    }

    fn incoming_neighbors(&self, dst: InternalNodeId, rel: Option<RelTypeId>) -> Self::Neighbors<'_> {
        Box::new(self.0.incoming_neighbors(dst, rel))
    }

    fn nodes(&self) -> Box<dyn Iterator<Item = InternalNodeId> + '_> {
        Box::new(self.0.nodes())
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

/// The engine: an in-memory graph plus the log file backing it.
///
/// A single writer lock serializes `WriteTxn`s; readers take a cheap `Arc`
/// clone of the live graph and never block on writers or each other.
pub struct GraphEngine {
    data: RwLock<GraphData>,
    writer: Mutex<()>,
    log_file: Mutex<File>,
    ndb_path: PathBuf,
    wal_path: PathBuf,
}

impl std::fmt::Debug for GraphEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphEngine").field("ndb_path", &self.ndb_path).field("wal_path", &self.wal_path).finish()
    }
}

impl GraphEngine {
    pub fn open(ndb_path: impl AsRef<Path>, wal_path: impl AsRef<Path>) -> Result<Self> {
        let ndb_path = ndb_path.as_ref().to_path_buf();
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !ndb_path.exists() {
            fs::write(&ndb_path, [])?;
        }

        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&wal_path)?;
        let data = replay(&mut file)?;
        log::debug!(
            "opened graph engine at {:?}: {} nodes, {} labels",
            wal_path,
            data.nodes.len(),
            data.labels.len()
        );

        Ok(Self { data: RwLock::new(data), writer: Mutex::new(()), log_file: Mutex::new(file), ndb_path, wal_path })
    }

    pub fn ndb_path(&self) -> &Path {
        &self.ndb_path
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    pub fn begin_read(&self) -> Snapshot {
        let data = self.data.read().expect("graph lock poisoned");
        Snapshot(Arc::new(data.clone()))
    }

    pub fn begin_write(&self) -> WriteTxn<'_> {
        let writer_guard = self.writer.try_lock().expect("another write transaction is already in progress");
        let guard = self.data.write().expect("graph lock poisoned");
        let original = guard.clone();
        WriteTxn { _writer_guard: writer_guard, guard, original, pending_log: Vec::new(), log_file: &self.log_file, committed: false }
    }

    pub fn lookup_internal_id(&self, external_id: ExternalId) -> Option<InternalNodeId> {
        self.data.read().expect("graph lock poisoned").e2i.get(&external_id).copied()
    }

    /// Drops tombstoned nodes/edges from the live graph. The log file is
    /// left as-is; a later reopen still replays the full history.
    pub fn compact(&self) -> Result<()> {
        let mut data = self.data.write().expect("graph lock poisoned");
        let before = data.nodes.len();
        data.nodes.retain(|_, n| !n.tombstoned);
        log::debug!("compaction dropped {} tombstoned nodes", before - data.nodes.len());
        let live_nodes: HashSet<InternalNodeId> = data.nodes.keys().copied().collect();
        data.e2i.retain(|_, iid| live_nodes.contains(iid));
        let tombstoned_edges = data.tombstoned_edges.clone();
        let is_live_edge = |e: &EdgeKey| {
            !tombstoned_edges.contains(e) && live_nodes.contains(&e.src) && live_nodes.contains(&e.dst)
        };
        for edges in data.out_edges.values_mut() {
            edges.retain(is_live_edge);
        }
        for edges in data.in_edges.values_mut() {
            edges.retain(is_live_edge);
        }
        data.out_edges.retain(|iid, _| live_nodes.contains(iid));
        data.in_edges.retain(|iid, _| live_nodes.contains(iid));
        data.tombstoned_edges.clear();
        data.edge_properties.retain(|e, _| live_nodes.contains(&e.src) && live_nodes.contains(&e.dst));
        Ok(())
    }
}

impl GraphStore for GraphEngine {
    type Snapshot = StorageSnapshot;

    fn snapshot(&self) -> StorageSnapshot {
        StorageSnapshot(self.begin_read())
    }
}

/// An exclusive write transaction. Mutations are applied to the live graph
/// immediately (so later operations in the same transaction observe
/// earlier ones) but are rolled back on drop unless `commit()` runs, and are
/// only durable once `commit()` has appended and flushed the log records.
pub struct WriteTxn<'a> {
    _writer_guard: std::sync::MutexGuard<'a, ()>,
    guard: std::sync::RwLockWriteGuard<'a, GraphData>,
    original: GraphData,
    pending_log: Vec<LogRecord>,
    log_file: &'a Mutex<File>,
    committed: bool,
}

impl WriteTxn<'_> {
    fn record_and_apply(&mut self, record: LogRecord) {
        apply_record(&mut self.guard, &record);
        self.pending_log.push(record);
    }

    pub fn create_node(&mut self, external_id: ExternalId, label_id: LabelId) -> Result<InternalNodeId> {
        if self.guard.e2i.contains_key(&external_id) {
            return Err(Error::DuplicateExternalId(external_id));
        }
        let internal_id = self.guard.next_node_id;
        self.record_and_apply(LogRecord::CreateNode { external_id, internal_id, label: label_id });
        Ok(internal_id)
    }

    pub fn add_node_label(&mut self, node: InternalNodeId, label_id: LabelId) {
        self.record_and_apply(LogRecord::AddNodeLabel { node, label: label_id });
    }

    pub fn remove_node_label(&mut self, node: InternalNodeId, label_id: LabelId) {
        self.record_and_apply(LogRecord::RemoveNodeLabel { node, label: label_id });
    }

    pub fn create_edge(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId) {
        self.record_and_apply(LogRecord::CreateEdge { src, rel, dst });
    }

    pub fn set_node_property(&mut self, node: InternalNodeId, key: String, value: PropertyValue) {
        self.record_and_apply(LogRecord::SetNodeProperty { node, key, value });
    }

    pub fn set_edge_property(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId, key: String, value: PropertyValue) {
        self.record_and_apply(LogRecord::SetEdgeProperty { src, rel, dst, key, value });
    }

    pub fn remove_node_property(&mut self, node: InternalNodeId, key: &str) {
        self.record_and_apply(LogRecord::RemoveNodeProperty { node, key: key.to_string() });
    }

    pub fn remove_edge_property(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId, key: &str) {
        self.record_and_apply(LogRecord::RemoveEdgeProperty { src, rel, dst, key: key.to_string() });
    }

    pub fn tombstone_node(&mut self, node: InternalNodeId) {
        self.record_and_apply(LogRecord::TombstoneNode { node });
    }

    pub fn tombstone_edge(&mut self, src: InternalNodeId, rel: RelTypeId, dst: InternalNodeId) {
        self.record_and_apply(LogRecord::TombstoneEdge { src, rel, dst });
    }

    pub fn get_or_create_label(&mut self, name: &str) -> Result<LabelId> {
        if let Some(id) = self.guard.labels.get(name) {
            return Ok(*id);
        }
        let id = self.guard.next_label_id;
        self.record_and_apply(LogRecord::InternLabel { name: name.to_string(), id });
        Ok(id)
    }

    pub fn get_or_create_rel_type(&mut self, name: &str) -> Result<RelTypeId> {
        if let Some(id) = self.guard.rel_types.get(name) {
            return Ok(*id);
        }
        let id = self.guard.next_rel_type_id;
        self.record_and_apply(LogRecord::InternRelType { name: name.to_string(), id });
        Ok(id)
    }

    pub fn create_index(&mut self, label_name: &str, field_name: &str) -> Result<()> {
        let label_id = self.get_or_create_label(label_name)?;
        self.record_and_apply(LogRecord::CreateIndex { label: label_id, field: field_name.to_string() });
        Ok(())
    }

    pub fn commit(mut self) -> Result<()> {
        let mut file = self.log_file.lock().expect("log file lock poisoned");
        for record in &self.pending_log {
            write_record(&mut file, record)?;
        }
        file.flush()?;
        file.sync_data()?;
        drop(file);
        self.committed = true;
        Ok(())
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.guard = std::mem::take(&mut self.original);
        }
    }
}
