use crate::index::{Direction, Neighbor, TypedGraph};
use crate::journal::{Journal, JournalError};
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, error, info};
use vulngraph_core::error::{ErrorCode, VulngraphError};
use vulngraph_core::model::{
    Edge, EdgeKind, NaturalKey, Node, NodeData, NodeId, NodeKind, Timestamp,
};

pub const JOURNAL_FILE: &str = "graph.wal";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("serialization error")]
    Serialization,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl VulngraphError for StoreError {
    fn error_code(&self) -> ErrorCode {
        match self {
            StoreError::Journal(err) => err.error_code(),
            StoreError::Serialization => ErrorCode::Internal,
            StoreError::NotFound(_) => ErrorCode::NotFound,
            StoreError::InvalidTransaction(_) => ErrorCode::InvalidArgument,
            StoreError::Unavailable(_) => ErrorCode::Unavailable,
        }
    }
}

/// One durable journal record: the full effect of a committed batch.
#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
pub enum JournalEntry {
    Commit(Vec<JournalOp>),
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
pub enum JournalOp {
    PutNode(Node),
    PutEdge(Edge),
}

/// Endpoint of an edge inside a batch: an existing handle, or a natural key
/// that may be created earlier in the same batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Id(NodeId),
    Key(NaturalKey),
}

impl From<NodeId> for NodeRef {
    fn from(value: NodeId) -> Self {
        NodeRef::Id(value)
    }
}

impl From<NaturalKey> for NodeRef {
    fn from(value: NaturalKey) -> Self {
        NodeRef::Key(value)
    }
}

impl From<&NaturalKey> for NodeRef {
    fn from(value: &NaturalKey) -> Self {
        NodeRef::Key(value.clone())
    }
}

#[derive(Debug, Clone)]
pub enum BatchOp {
    UpsertNode {
        key: NaturalKey,
        data: NodeData,
    },
    UpsertEdge {
        kind: EdgeKind,
        from: NodeRef,
        to: NodeRef,
        since: Option<Timestamp>,
    },
}

/// Upserts committed all-or-nothing by [`GraphStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct GraphBatch {
    ops: Vec<BatchOp>,
}

impl GraphBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_node(&mut self, key: NaturalKey, data: NodeData) -> &mut Self {
        self.ops.push(BatchOp::UpsertNode { key, data });
        self
    }

    pub fn upsert_edge(
        &mut self,
        kind: EdgeKind,
        from: impl Into<NodeRef>,
        to: impl Into<NodeRef>,
        since: Option<Timestamp>,
    ) -> &mut Self {
        self.ops.push(BatchOp::UpsertEdge {
            kind,
            from: from.into(),
            to: to.into(),
            since,
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub nodes_unchanged: usize,
    pub edges_created: usize,
    /// Resolved handle for every `UpsertNode`, in batch order.
    pub node_ids: Vec<NodeId>,
    /// LSN of the journal record, `None` when nothing changed.
    pub lsn: Option<u64>,
}

impl CommitSummary {
    pub fn is_noop(&self) -> bool {
        self.nodes_created == 0 && self.nodes_updated == 0 && self.edges_created == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub nodes: BTreeMap<NodeKind, usize>,
    pub edges: BTreeMap<EdgeKind, usize>,
}

impl StoreStats {
    pub fn node_count(&self, kind: NodeKind) -> usize {
        self.nodes.get(&kind).copied().unwrap_or(0)
    }

    pub fn edge_count(&self, kind: EdgeKind) -> usize {
        self.edges.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_nodes(&self) -> usize {
        self.nodes.values().sum()
    }

    pub fn total_edges(&self) -> usize {
        self.edges.values().sum()
    }
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, Node>,
    keys: HashMap<NaturalKey, NodeId>,
    graph: TypedGraph,
    next_id: u64,
}

impl GraphState {
    fn apply(&mut self, op: JournalOp) {
        match op {
            JournalOp::PutNode(node) => {
                self.next_id = self.next_id.max(node.id.0 + 1);
                self.keys.insert(node.key.clone(), node.id);
                self.nodes.insert(node.id, node);
            }
            JournalOp::PutEdge(edge) => {
                self.graph.insert(&edge);
            }
        }
    }

    fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for node in self.nodes.values() {
            *stats.nodes.entry(node.kind()).or_insert(0) += 1;
        }
        for kind in EdgeKind::ALL {
            let count = self.graph.edge_count(kind);
            if count > 0 {
                stats.edges.insert(kind, count);
            }
        }
        stats
    }
}

/// Durable property graph with upsert-by-natural-key.
///
/// Writers are serialized: a batch is validated against current state, written
/// to the journal as one record, then applied under the state write lock, so
/// readers see either none or all of it.
pub struct GraphStore {
    journal: Arc<Mutex<Journal>>,
    tx_lock: Arc<Mutex<()>>,
    state: Arc<RwLock<GraphState>>,
    available: AtomicBool,
}

impl GraphStore {
    /// Open the store in `dir`, replaying its journal.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = dir.as_ref().join(JOURNAL_FILE);
        let mut journal = Journal::open(&path).await?;
        let mut state = GraphState::default();

        let last_lsn = journal
            .replay(|_lsn, payload| {
                let mut aligned = rkyv::AlignedVec::with_capacity(payload.len());
                aligned.extend_from_slice(payload);
                let archived = rkyv::check_archived_root::<JournalEntry>(&aligned[..])
                    .map_err(|_| JournalError::CorruptEntry)?;
                let entry: JournalEntry = archived
                    .deserialize(&mut rkyv::Infallible)
                    .map_err(|_| JournalError::CorruptEntry)?;
                let JournalEntry::Commit(ops) = entry;
                for op in ops {
                    state.apply(op);
                }
                Ok(())
            })
            .await?;

        info!(
            path = %path.display(),
            last_lsn,
            nodes = state.nodes.len(),
            edges = state.graph.total_edges(),
            "graph store opened"
        );

        Ok(Self {
            journal: Arc::new(Mutex::new(journal)),
            tx_lock: Arc::new(Mutex::new(())),
            state: Arc::new(RwLock::new(state)),
            available: AtomicBool::new(true),
        })
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub async fn upsert_node(&self, key: NaturalKey, data: NodeData) -> Result<NodeId, StoreError> {
        let mut batch = GraphBatch::new();
        batch.upsert_node(key, data);
        let summary = self.commit(batch).await?;
        summary
            .node_ids
            .first()
            .copied()
            .ok_or_else(|| StoreError::InvalidTransaction("upsert resolved no node".into()))
    }

    /// Returns `true` when the edge was created, `false` when it already existed.
    pub async fn upsert_edge(
        &self,
        kind: EdgeKind,
        from: NodeId,
        to: NodeId,
        since: Option<Timestamp>,
    ) -> Result<bool, StoreError> {
        let mut batch = GraphBatch::new();
        batch.upsert_edge(kind, from, to, since);
        Ok(self.commit(batch).await?.edges_created > 0)
    }

    pub async fn get_node(&self, id: NodeId) -> Result<Node, StoreError> {
        let state = self.state.read().await;
        state
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn get_by_natural_key(&self, key: &NaturalKey) -> Result<Node, StoreError> {
        let state = self.state.read().await;
        state
            .keys
            .get(key)
            .and_then(|id| state.nodes.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub async fn neighbors(
        &self,
        id: NodeId,
        kind: EdgeKind,
        direction: Direction,
    ) -> Vec<Neighbor> {
        let state = self.state.read().await;
        state.graph.neighbors(id, kind, direction).collect()
    }

    pub async fn stats(&self) -> StoreStats {
        self.state.read().await.stats()
    }

    /// Read-consistent view. Writers wait until it is dropped.
    pub async fn snapshot(&self) -> GraphSnapshot<'_> {
        GraphSnapshot {
            state: self.state.read().await,
        }
    }

    /// Validate and apply a batch atomically. Nothing is journaled or applied
    /// when validation fails; an unchanged batch is not journaled.
    pub async fn commit(&self, batch: GraphBatch) -> Result<CommitSummary, StoreError> {
        if !self.is_available() {
            return Err(StoreError::Unavailable(
                "journal write failed earlier; store is read-only".into(),
            ));
        }

        let _tx_guard = self.tx_lock.lock().await;

        let (summary, ops) = {
            let state = self.state.read().await;
            stage(&state, batch)?
        };

        if ops.is_empty() {
            debug!("batch left the graph unchanged");
            return Ok(summary);
        }

        let entry = JournalEntry::Commit(ops);
        let bytes = rkyv::to_bytes::<_, 4096>(&entry).map_err(|_| StoreError::Serialization)?;

        let lsn = {
            let mut journal = self.journal.lock().await;
            let written = match journal.append(&bytes).await {
                Ok(lsn) => journal.flush().await.map(|_| lsn),
                Err(err) => Err(err),
            };
            match written {
                Ok(lsn) => lsn,
                Err(err) => {
                    self.available.store(false, Ordering::SeqCst);
                    error!(error = %err, "journal write failed; refusing further writes");
                    return Err(StoreError::Unavailable(err.to_string()));
                }
            }
        };

        let JournalEntry::Commit(ops) = entry;
        let mut state = self.state.write().await;
        for op in ops {
            state.apply(op);
        }

        Ok(CommitSummary {
            lsn: Some(lsn),
            ..summary
        })
    }
}

/// Resolve a batch against `state` without mutating it.
fn stage(state: &GraphState, batch: GraphBatch) -> Result<(CommitSummary, Vec<JournalOp>), StoreError> {
    let mut summary = CommitSummary::default();
    let mut staged_nodes: BTreeMap<NodeId, Node> = BTreeMap::new();
    let mut staged_keys: HashMap<NaturalKey, NodeId> = HashMap::new();
    let mut created: HashSet<NodeId> = HashSet::new();
    let mut updated: HashSet<NodeId> = HashSet::new();
    let mut touched: HashSet<NodeId> = HashSet::new();
    let mut staged_edges: Vec<Edge> = Vec::new();
    let mut seen_edges: HashSet<(EdgeKind, NodeId, NodeId)> = HashSet::new();
    let mut next_id = state.next_id;

    let kind_of = |id: NodeId, staged: &BTreeMap<NodeId, Node>| -> Option<NodeKind> {
        staged
            .get(&id)
            .or_else(|| state.nodes.get(&id))
            .map(|node| node.kind())
    };

    for op in batch.ops {
        match op {
            BatchOp::UpsertNode { key, data } => {
                if key.kind() != data.kind() {
                    return Err(StoreError::InvalidTransaction(format!(
                        "{:?} payload for {:?} key {}",
                        data.kind(),
                        key.kind(),
                        key
                    )));
                }
                let existing = staged_keys
                    .get(&key)
                    .or_else(|| state.keys.get(&key))
                    .copied();
                let id = match existing {
                    Some(id) => {
                        let mut node = match staged_nodes.get(&id) {
                            Some(node) => node.clone(),
                            None => state
                                .nodes
                                .get(&id)
                                .cloned()
                                .ok_or_else(|| StoreError::NotFound(id.to_string()))?,
                        };
                        if node.data.absorb(data) {
                            if !created.contains(&id) {
                                updated.insert(id);
                            }
                            staged_nodes.insert(id, node);
                        }
                        id
                    }
                    None => {
                        let id = NodeId(next_id);
                        next_id += 1;
                        staged_keys.insert(key.clone(), id);
                        staged_nodes.insert(id, Node { id, key, data });
                        created.insert(id);
                        id
                    }
                };
                touched.insert(id);
                summary.node_ids.push(id);
            }
            BatchOp::UpsertEdge {
                kind,
                from,
                to,
                since,
            } => {
                let source = resolve(state, &staged_keys, &staged_nodes, &from)?;
                let target = resolve(state, &staged_keys, &staged_nodes, &to)?;
                let (Some(from_kind), Some(to_kind)) =
                    (kind_of(source, &staged_nodes), kind_of(target, &staged_nodes))
                else {
                    return Err(StoreError::InvalidTransaction(format!(
                        "{kind} endpoint does not exist"
                    )));
                };
                if !kind.accepts(from_kind, to_kind) {
                    return Err(StoreError::InvalidTransaction(format!(
                        "{kind} cannot connect {from_kind:?} to {to_kind:?}"
                    )));
                }
                if kind == EdgeKind::Reuse && source == target {
                    return Err(StoreError::InvalidTransaction(format!(
                        "{kind} self-loop on {source}"
                    )));
                }
                if state.graph.contains(kind, source, target)
                    || !seen_edges.insert((kind, source, target))
                {
                    continue;
                }
                staged_edges.push(Edge {
                    kind,
                    source,
                    target,
                    since,
                });
            }
        }
    }

    summary.nodes_created = created.len();
    summary.nodes_updated = updated.len();
    summary.nodes_unchanged = touched.len() - created.len() - updated.len();
    summary.edges_created = staged_edges.len();

    let mut ops: Vec<JournalOp> = staged_nodes.into_values().map(JournalOp::PutNode).collect();
    ops.extend(staged_edges.into_iter().map(JournalOp::PutEdge));
    Ok((summary, ops))
}

fn resolve(
    state: &GraphState,
    staged_keys: &HashMap<NaturalKey, NodeId>,
    staged_nodes: &BTreeMap<NodeId, Node>,
    node: &NodeRef,
) -> Result<NodeId, StoreError> {
    match node {
        NodeRef::Id(id) if staged_nodes.contains_key(id) || state.nodes.contains_key(id) => Ok(*id),
        NodeRef::Id(id) => Err(StoreError::InvalidTransaction(format!(
            "edge endpoint {id} does not exist"
        ))),
        NodeRef::Key(key) => staged_keys
            .get(key)
            .or_else(|| state.keys.get(key))
            .copied()
            .ok_or_else(|| {
                StoreError::InvalidTransaction(format!("edge endpoint {key} does not exist"))
            }),
    }
}

/// Consistent read view over the graph.
pub struct GraphSnapshot<'a> {
    state: RwLockReadGuard<'a, GraphState>,
}

impl GraphSnapshot<'_> {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.state.nodes.get(&id)
    }

    pub fn resolve(&self, key: &NaturalKey) -> Option<NodeId> {
        self.state.keys.get(key).copied()
    }

    pub fn node_by_key(&self, key: &NaturalKey) -> Option<&Node> {
        self.resolve(key).and_then(|id| self.node(id))
    }

    pub fn neighbors(
        &self,
        id: NodeId,
        kind: EdgeKind,
        direction: Direction,
    ) -> impl Iterator<Item = Neighbor> + '_ {
        self.state.graph.neighbors(id, kind, direction)
    }

    pub fn edge(&self, kind: EdgeKind, source: NodeId, target: NodeId) -> Option<Edge> {
        self.state.graph.edge(kind, source, target)
    }

    pub fn stats(&self) -> StoreStats {
        self.state.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vulngraph_core::model::{SoftwareData, VersionData, VulnerabilityData};

    fn vuln(description: &str) -> NodeData {
        NodeData::Vulnerability(VulnerabilityData {
            description: description.to_string(),
            published: Some(1_700_000_000),
            ..Default::default()
        })
    }

    fn software(name: &str) -> NodeData {
        NodeData::Software(SoftwareData {
            name: name.to_string(),
            author: "acme".to_string(),
            url: None,
        })
    }

    fn version(version: &str) -> NodeData {
        NodeData::Version(VersionData {
            version: version.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_upsert_node_is_idempotent_by_key() {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path()).await.unwrap();
        let key = NaturalKey::vulnerability("CVE-2024-0001");

        let first = store.upsert_node(key.clone(), vuln("first")).await.unwrap();
        let second = store.upsert_node(key.clone(), vuln("second")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.get_node(first).await.unwrap().key, key);
        let node = store.get_by_natural_key(&key).await.unwrap();
        assert_eq!(node.as_vulnerability().unwrap().description, "second");
        assert_eq!(store.stats().await.node_count(NodeKind::Vulnerability), 1);
    }

    #[tokio::test]
    async fn test_get_by_natural_key_not_found() {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path()).await.unwrap();
        let err = store
            .get_by_natural_key(&NaturalKey::software("nope", "nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_batch_resolves_keys_created_in_same_batch() {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path()).await.unwrap();
        let sw = NaturalKey::software("libfoo", "acme");
        let ver = NaturalKey::version("libfoo", "acme", "1.0");

        let mut batch = GraphBatch::new();
        batch
            .upsert_node(sw.clone(), software("libfoo"))
            .upsert_node(ver.clone(), version("1.0"))
            .upsert_edge(EdgeKind::HasVersion, &sw, &ver, None)
            .upsert_edge(EdgeKind::HasVersion, &sw, &ver, None);
        let summary = store.commit(batch).await.unwrap();

        assert_eq!(summary.nodes_created, 2);
        assert_eq!(summary.edges_created, 1);
        assert_eq!(summary.lsn, Some(1));

        let snapshot = store.snapshot().await;
        let sw_id = snapshot.resolve(&sw).unwrap();
        let versions: Vec<_> = snapshot
            .neighbors(sw_id, EdgeKind::HasVersion, Direction::Outgoing)
            .map(|n| n.node)
            .collect();
        assert_eq!(versions, vec![snapshot.resolve(&ver).unwrap()]);
    }

    #[tokio::test]
    async fn test_invalid_batch_commits_nothing() {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path()).await.unwrap();
        let cve = NaturalKey::vulnerability("CVE-2024-0002");

        let mut batch = GraphBatch::new();
        batch
            .upsert_node(cve.clone(), vuln("x"))
            .upsert_edge(
                EdgeKind::Affects,
                &cve,
                NaturalKey::software("ghost", "acme"),
                None,
            );
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransaction(_)));
        assert!(store.get_by_natural_key(&cve).await.is_err());

        drop(store);
        let reopened = GraphStore::open(dir.path()).await.unwrap();
        assert!(reopened.get_by_natural_key(&cve).await.is_err());
    }

    #[tokio::test]
    async fn test_edge_kind_endpoints_are_checked() {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path()).await.unwrap();
        let sw = store
            .upsert_node(NaturalKey::software("libfoo", "acme"), software("libfoo"))
            .await
            .unwrap();
        let ver = store
            .upsert_node(NaturalKey::version("libfoo", "acme", "1.0"), version("1.0"))
            .await
            .unwrap();

        assert!(store.upsert_edge(EdgeKind::Reuse, sw, ver, None).await.is_err());
        assert!(store.upsert_edge(EdgeKind::Reuse, ver, ver, None).await.is_err());
        assert!(store.upsert_edge(EdgeKind::HasVersion, sw, ver, None).await.unwrap());
        assert!(!store.upsert_edge(EdgeKind::HasVersion, sw, ver, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_unchanged_batch_is_not_journaled() {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path()).await.unwrap();
        let key = NaturalKey::vulnerability("CVE-2024-0003");

        store.upsert_node(key.clone(), vuln("same")).await.unwrap();
        let journal_len = tokio::fs::metadata(dir.path().join(JOURNAL_FILE))
            .await
            .unwrap()
            .len();

        let mut batch = GraphBatch::new();
        batch.upsert_node(key, vuln("same"));
        let summary = store.commit(batch).await.unwrap();

        assert!(summary.is_noop());
        assert_eq!(summary.nodes_unchanged, 1);
        assert_eq!(summary.lsn, None);
        assert_eq!(
            tokio::fs::metadata(dir.path().join(JOURNAL_FILE))
                .await
                .unwrap()
                .len(),
            journal_len
        );
    }

    #[tokio::test]
    async fn test_replay_restores_nodes_edges_and_ids() {
        let dir = tempdir().unwrap();
        let a = NaturalKey::version("liba", "acme", "1.0");
        let b = NaturalKey::version("libb", "acme", "2.0");

        let (a_id, b_id) = {
            let store = GraphStore::open(dir.path()).await.unwrap();
            let a_id = store.upsert_node(a.clone(), version("1.0")).await.unwrap();
            let b_id = store.upsert_node(b.clone(), version("2.0")).await.unwrap();
            store
                .upsert_edge(EdgeKind::Reuse, b_id, a_id, Some(1_600_000_000))
                .await
                .unwrap();
            (a_id, b_id)
        };

        let store = GraphStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get_by_natural_key(&a).await.unwrap().id, a_id);
        assert_eq!(store.get_by_natural_key(&b).await.unwrap().id, b_id);
        let reusers = store.neighbors(a_id, EdgeKind::Reuse, Direction::Incoming).await;
        assert_eq!(
            reusers,
            vec![Neighbor {
                node: b_id,
                since: Some(1_600_000_000)
            }]
        );

        let c_id = store
            .upsert_node(NaturalKey::version("libc", "acme", "3.0"), version("3.0"))
            .await
            .unwrap();
        assert!(c_id > b_id, "ids continue after replay");
    }

    #[tokio::test]
    async fn test_key_and_payload_kind_must_match() {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path()).await.unwrap();
        let err = store
            .upsert_node(NaturalKey::vulnerability("CVE-2024-0004"), software("libfoo"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransaction(_)));
    }
}
