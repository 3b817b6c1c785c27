use crate::policy::{CleaningPolicy, NoOpPolicy, PolicyError, RecordPolicy};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use storage::{GraphBatch, GraphStore, StoreError};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vulngraph_core::config::IngestionConfig;
use vulngraph_core::error::{ErrorCode, VulngraphError};
use vulngraph_core::model::{to_timestamp, EdgeKind, NaturalKey};
use vulngraph_core::record::{version_data, ComponentRef, NormalizedRecord, ReuseDescriptor};

/// Batches loaded at the same time by [`GraphLoader::load_all`].
pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("invalid reuse edge: {0}")]
    InvalidReuseEdge(String),
    #[error("incomplete patch record for {vuln_id}: {reason}")]
    IncompletePatchRecord { vuln_id: String, reason: String },
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] PolicyError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LoadError {
    /// Only store failures stop a load; everything else skips one record.
    pub fn is_fatal(&self) -> bool {
        match self {
            LoadError::Store(err) => matches!(
                err,
                StoreError::Unavailable(_) | StoreError::Journal(_) | StoreError::Serialization
            ),
            _ => false,
        }
    }
}

impl VulngraphError for LoadError {
    fn error_code(&self) -> ErrorCode {
        match self {
            LoadError::InvalidReuseEdge(_)
            | LoadError::IncompletePatchRecord { .. }
            | LoadError::InvalidRecord(_) => ErrorCode::InvalidArgument,
            LoadError::Store(err) => err.error_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub vuln_id: String,
    pub code: ErrorCode,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl LoadReport {
    pub fn loaded(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    fn record(&mut self, status: RecordStatus) {
        match status {
            RecordStatus::Inserted => self.inserted += 1,
            RecordStatus::Updated => self.updated += 1,
            RecordStatus::Unchanged => self.unchanged += 1,
        }
    }

    fn absorb(&mut self, other: LoadReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped.extend(other.skipped);
    }
}

/// Releases the per-key mutex and forgets the key once nobody else waits on it.
struct KeyGuard {
    key: NaturalKey,
    locks: Arc<DashMap<NaturalKey, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Materializes normalized records into the graph store, one atomic commit
/// per record.
#[derive(Clone)]
pub struct GraphLoader {
    store: Arc<GraphStore>,
    policy: Arc<dyn RecordPolicy>,
    // In-flight vulnerability keys
    locks: Arc<DashMap<NaturalKey, Arc<Mutex<()>>>>,
    batch_size: usize,
    parallelism: usize,
}

impl GraphLoader {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self::with_config(store, &IngestionConfig::default())
    }

    pub fn with_config(store: Arc<GraphStore>, config: &IngestionConfig) -> Self {
        let policy: Arc<dyn RecordPolicy> = if config.clean_records {
            Arc::new(CleaningPolicy)
        } else {
            Arc::new(NoOpPolicy)
        };
        Self {
            store,
            policy,
            locks: Arc::new(DashMap::new()),
            batch_size: config.batch_size.max(1),
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn RecordPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn lock_key(&self, key: &NaturalKey) -> KeyGuard {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            key: key.clone(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Upsert one record: its vulnerability, affected components, patches and
    /// reuse links land together or not at all.
    pub async fn load_record(&self, record: NormalizedRecord) -> Result<RecordStatus, LoadError> {
        let record = self.policy.apply(record)?;
        let key = record.key();
        let batch = plan_record(&record)?;

        let _guard = self.lock_key(&key).await;
        let existed = self.store.get_by_natural_key(&key).await.is_ok();
        let summary = self.store.commit(batch).await?;

        let status = if !existed {
            RecordStatus::Inserted
        } else if summary.is_noop() {
            RecordStatus::Unchanged
        } else {
            RecordStatus::Updated
        };
        debug!(
            vuln_id = %key,
            ?status,
            nodes_created = summary.nodes_created,
            edges_created = summary.edges_created,
            "record loaded"
        );
        Ok(status)
    }

    /// Load records in order. Invalid records are skipped and reported; a store
    /// failure aborts the batch.
    pub async fn load_batch(&self, records: Vec<NormalizedRecord>) -> Result<LoadReport, LoadError> {
        let mut report = LoadReport::default();
        for record in records {
            let vuln_id = record.vuln_id.clone();
            match self.load_record(record).await {
                Ok(status) => report.record(status),
                Err(err) if err.is_fatal() => {
                    error!(vuln_id = %vuln_id, error = %err, "store failure; aborting batch");
                    return Err(err);
                }
                Err(err) => {
                    warn!(vuln_id = %vuln_id, error = %err, "record skipped");
                    report.skipped.push(SkippedRecord {
                        vuln_id,
                        code: err.error_code(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Split `records` into `batch_size` chunks and load up to `parallelism`
    /// chunks at once. Records for the same vulnerability serialize on its key.
    pub async fn load_all(&self, records: Vec<NormalizedRecord>) -> Result<LoadReport, LoadError> {
        let total = records.len();
        let mut chunks = Vec::new();
        let mut iter = records.into_iter().peekable();
        while iter.peek().is_some() {
            chunks.push(iter.by_ref().take(self.batch_size).collect::<Vec<_>>());
        }

        let mut report = LoadReport::default();
        let mut tasks = JoinSet::new();
        let mut fatal = None;
        for chunk in chunks {
            if tasks.len() >= self.parallelism {
                if let Some(joined) = tasks.join_next().await {
                    collect_batch(joined, &mut report, &mut fatal);
                }
            }
            if fatal.is_some() {
                break;
            }
            let loader = self.clone();
            tasks.spawn(async move { loader.load_batch(chunk).await });
        }
        while let Some(joined) = tasks.join_next().await {
            collect_batch(joined, &mut report, &mut fatal);
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        info!(
            records = total,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped.len(),
            "load finished"
        );
        Ok(report)
    }

    /// Record that `reuse.from` reuses code of `reuse.to`. Returns whether a
    /// new edge was created.
    pub async fn link_reuse(&self, reuse: &ReuseDescriptor) -> Result<bool, LoadError> {
        let mut batch = GraphBatch::new();
        plan_reuse(&mut batch, reuse)?;
        let summary = self.store.commit(batch).await?;
        Ok(summary.edges_created > 0)
    }
}

fn collect_batch(
    joined: Result<Result<LoadReport, LoadError>, tokio::task::JoinError>,
    report: &mut LoadReport,
    fatal: &mut Option<LoadError>,
) {
    match joined {
        Ok(Ok(batch)) => report.absorb(batch),
        Ok(Err(err)) => {
            fatal.get_or_insert(err);
        }
        Err(join_error) => {
            fatal.get_or_insert(LoadError::Store(StoreError::Unavailable(format!(
                "load task failed: {join_error}"
            ))));
        }
    }
}

/// Every write one record implies, as a single batch.
fn plan_record(record: &NormalizedRecord) -> Result<GraphBatch, LoadError> {
    let vuln = record.key();
    let mut batch = GraphBatch::new();
    batch.upsert_node(vuln.clone(), record.vulnerability_data());

    for affected in &record.affected {
        let software = plan_component(&mut batch, affected);
        batch.upsert_edge(EdgeKind::Affects, &vuln, &software, None);
        if let Some(version) = affected.version_key() {
            batch.upsert_edge(EdgeKind::AffectsVersion, &vuln, &version, None);
        }
    }

    for patch in &record.patches {
        let missing = [
            ("repo_owner", &patch.repo_owner),
            ("repo_name", &patch.repo_name),
            ("commit_id", &patch.commit_id),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());
        if let Some((field, _)) = missing {
            return Err(LoadError::IncompletePatchRecord {
                vuln_id: record.vuln_id.clone(),
                reason: format!("missing {field}"),
            });
        }
        if !patch.fix_cve_id.trim().is_empty()
            && NaturalKey::vulnerability(&patch.fix_cve_id) != vuln
        {
            return Err(LoadError::IncompletePatchRecord {
                vuln_id: record.vuln_id.clone(),
                reason: format!("patch fixes {}", patch.fix_cve_id),
            });
        }

        let patch_key = patch.key();
        let fix = patch.fix_component();
        let software = fix.software_key();
        batch.upsert_node(software.clone(), fix.software_data());
        let fix_version = fix.key();
        batch
            .upsert_node(fix_version.clone(), patch.fix_version_data())
            .upsert_edge(EdgeKind::HasVersion, &software, &fix_version, None)
            .upsert_node(patch_key.clone(), patch.patch_data(&record.vuln_id))
            .upsert_edge(EdgeKind::FixCve, &patch_key, &vuln, None)
            .upsert_edge(EdgeKind::FixVersion, &patch_key, &fix_version, None);
    }

    for reuse in &record.reuse {
        plan_reuse(&mut batch, reuse)?;
    }
    Ok(batch)
}

/// Software node, plus version node and ownership edge when versioned.
/// Returns the software key.
fn plan_component(batch: &mut GraphBatch, component: &ComponentRef) -> NaturalKey {
    let software = component.software_key();
    batch.upsert_node(software.clone(), component.software_data());
    if let (Some(version), Some(data)) = (component.version_key(), version_data(component)) {
        batch
            .upsert_node(version.clone(), data)
            .upsert_edge(EdgeKind::HasVersion, &software, &version, None);
    }
    software
}

fn plan_reuse(batch: &mut GraphBatch, reuse: &ReuseDescriptor) -> Result<(), LoadError> {
    let (from, to) = match (reuse.from.version_key(), reuse.to.version_key()) {
        (Some(from), Some(to)) => (from, to),
        (None, None) => (reuse.from.software_key(), reuse.to.software_key()),
        _ => {
            return Err(LoadError::InvalidReuseEdge(format!(
                "{} and {} are at different granularity",
                reuse.from.key(),
                reuse.to.key()
            )))
        }
    };
    if from == to {
        return Err(LoadError::InvalidReuseEdge(format!("self-loop on {from}")));
    }

    plan_component(batch, &reuse.from);
    plan_component(batch, &reuse.to);
    batch.upsert_edge(
        EdgeKind::Reuse,
        &from,
        &to,
        reuse.commit_date.map(to_timestamp),
    );
    Ok(())
}
