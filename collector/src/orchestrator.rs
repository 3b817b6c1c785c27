use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::merge::RecordMerger;
use crate::sources::build_adapter;
use crate::window::DateWindow;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vulngraph_core::config::AppConfig;
use vulngraph_core::error::{ErrorCode, VulngraphError};
use vulngraph_core::record::NormalizedRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Succeeded,
    Failed { code: ErrorCode, reason: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    #[serde(flatten)]
    pub status: SourceStatus,
    /// Records fetched before cross-source merging.
    pub records: usize,
    pub elapsed_ms: u64,
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        self.status == SourceStatus::Succeeded
    }
}

/// Result of one collection run: per-source outcomes plus the merged records.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRun {
    pub window: DateWindow,
    pub outcomes: Vec<SourceOutcome>,
    #[serde(skip)]
    pub records: Vec<NormalizedRecord>,
    pub fetched: usize,
    pub merged: usize,
}

impl CollectionRun {
    pub fn failed_sources(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(|outcome| outcome.source.as_str())
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        let failed = self.failed_sources().len();
        failed > 0 && failed < self.outcomes.len()
    }

    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| !o.is_success())
    }
}

/// Runs adapters concurrently, each under its own request policy, and merges
/// their output per vulnerability.
pub struct CollectionOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    merger: RecordMerger,
}

impl CollectionOrchestrator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, merger: RecordMerger) -> Self {
        Self { adapters, merger }
    }

    /// One adapter per enabled source in `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, SourceError> {
        let mut adapters = Vec::new();
        for (name, source) in config.sources.iter().filter(|(_, s)| s.enabled) {
            adapters.push(build_adapter(name, source)?);
        }
        Ok(Self::new(adapters, RecordMerger::new(config.merge.clone())))
    }

    pub fn sources(&self) -> Vec<&str> {
        self.adapters.iter().map(|adapter| adapter.source()).collect()
    }

    /// Fetch `window` from the selected sources (all when `only` is `None`).
    /// A failing source never aborts the others.
    pub async fn collect(
        &self,
        window: DateWindow,
        only: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> CollectionRun {
        let mut outcomes = Vec::new();
        let selected: Vec<Arc<dyn SourceAdapter>> = match only {
            None => self.adapters.clone(),
            Some(names) => {
                let mut selected = Vec::new();
                for name in names {
                    match self.adapters.iter().find(|a| a.source() == name.as_str()) {
                        Some(adapter) => selected.push(adapter.clone()),
                        None => {
                            warn!(source = %name, "source is not configured");
                            outcomes.push(SourceOutcome {
                                source: name.clone(),
                                status: SourceStatus::Failed {
                                    code: ErrorCode::InvalidArgument,
                                    reason: "source is not configured".to_string(),
                                },
                                records: 0,
                                elapsed_ms: 0,
                            });
                        }
                    }
                }
                selected
            }
        };

        let handles: Vec<_> = selected
            .into_iter()
            .map(|adapter| {
                let token = cancel.child_token();
                let source = adapter.source().to_string();
                let handle = tokio::spawn(async move {
                    let started = Instant::now();
                    let result = adapter.fetch_window(window, &token).await;
                    (result, started.elapsed())
                });
                (source, handle)
            })
            .collect();

        let mut collected = Vec::new();
        for (source, handle) in handles {
            let (status, records, elapsed_ms) = match handle.await {
                Ok((Ok(records), elapsed)) => {
                    info!(
                        source = %source,
                        records = records.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "source collected"
                    );
                    let count = records.len();
                    collected.extend(records);
                    (SourceStatus::Succeeded, count, elapsed.as_millis() as u64)
                }
                Ok((Err(SourceError::Cancelled), elapsed)) => {
                    warn!(source = %source, "source fetch cancelled; partial data discarded");
                    (SourceStatus::Cancelled, 0, elapsed.as_millis() as u64)
                }
                Ok((Err(err), elapsed)) => {
                    warn!(source = %source, error = %err, "source failed");
                    (
                        SourceStatus::Failed {
                            code: err.error_code(),
                            reason: err.to_string(),
                        },
                        0,
                        elapsed.as_millis() as u64,
                    )
                }
                Err(join_error) => {
                    warn!(source = %source, error = %join_error, "source task aborted");
                    (
                        SourceStatus::Failed {
                            code: ErrorCode::Internal,
                            reason: join_error.to_string(),
                        },
                        0,
                        0,
                    )
                }
            };
            outcomes.push(SourceOutcome {
                source,
                status,
                records,
                elapsed_ms,
            });
        }

        let fetched = collected.len();
        let records = self.merger.merge_all(collected);
        info!(
            window = %window,
            fetched,
            merged = records.len(),
            failed = outcomes.iter().filter(|o| !o.is_success()).count(),
            "collection run finished"
        );

        CollectionRun {
            window,
            outcomes,
            merged: records.len(),
            records,
            fetched,
        }
    }
}
