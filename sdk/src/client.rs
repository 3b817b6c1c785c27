use crate::error::SdkError;
use crate::report::CollectReport;
use analysis::{AnalysisEngine, ImpactReport, PathOutcome};
use chrono::{DateTime, Utc};
use collector::{CollectionOrchestrator, DateWindow};
use ingestion::GraphLoader;
use std::sync::Arc;
use storage::{GraphStore, StoreStats};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vulngraph_core::config::AppConfig;
use vulngraph_core::model::NaturalKey;

#[derive(Debug, Clone)]
pub struct CollectRequest {
    /// `None` runs every enabled source.
    pub sources: Option<Vec<String>>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Entry point for the `collect`, `analyze-impact` and `analyze-path`
/// commands over one graph store.
pub struct Vulngraph {
    config: AppConfig,
    store: Arc<GraphStore>,
    orchestrator: CollectionOrchestrator,
    loader: GraphLoader,
    engine: AnalysisEngine,
}

impl Vulngraph {
    /// Open the store at `database.uri` and build one adapter per enabled source.
    pub async fn open(config: AppConfig) -> Result<Self, SdkError> {
        let orchestrator = CollectionOrchestrator::from_config(&config)?;
        Self::with_orchestrator(config, orchestrator).await
    }

    pub async fn with_orchestrator(
        config: AppConfig,
        orchestrator: CollectionOrchestrator,
    ) -> Result<Self, SdkError> {
        config.validate()?;
        let store = Arc::new(GraphStore::open(&config.database.uri).await?);
        let loader = GraphLoader::with_config(store.clone(), &config.ingestion);
        let engine = AnalysisEngine::new(store.clone(), config.analysis.clone());
        info!(
            uri = %config.database.uri,
            sources = ?orchestrator.sources(),
            "vulngraph opened"
        );
        Ok(Self {
            config,
            store,
            orchestrator,
            loader,
            engine,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Fetch the window from the selected sources and load the merged
    /// records. Source failures are reported, not raised; a store failure
    /// aborts the load.
    pub async fn collect(
        &self,
        request: CollectRequest,
        cancel: &CancellationToken,
    ) -> Result<CollectReport, SdkError> {
        let window = DateWindow::new(request.start, request.end)?;
        let mut run = self
            .orchestrator
            .collect(window, request.sources.as_deref(), cancel)
            .await;
        if run.all_failed() {
            warn!(window = %window, "every source failed; nothing to load");
        }

        let records = std::mem::take(&mut run.records);
        let load = self.loader.load_all(records).await?;
        let report = CollectReport::new(run, load);
        info!(
            window = %window,
            status = ?report.status,
            inserted = report.load.inserted,
            updated = report.load.updated,
            skipped = report.load.skipped.len(),
            "collect finished"
        );
        Ok(report)
    }

    /// `None` is rejected as unbounded.
    pub async fn analyze_impact(
        &self,
        vuln_id: &str,
        depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<ImpactReport, SdkError> {
        Ok(self.engine.analyze_impact(vuln_id, depth, cancel).await?)
    }

    pub async fn analyze_path(
        &self,
        vuln_id: &str,
        target: &NaturalKey,
        max_hops: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<PathOutcome, SdkError> {
        let max_hops = max_hops.unwrap_or(self.config.analysis.max_path_hops);
        Ok(self
            .engine
            .analyze_path_within(vuln_id, target, max_hops, cancel)
            .await?)
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }
}
