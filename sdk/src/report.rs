use collector::{CollectionRun, DateWindow, SourceOutcome};
use ingestion::LoadReport;
use serde::Serialize;

/// Overall result of a command, mapped onto process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Some sources failed or some records were skipped.
    PartialSuccess,
    Failure,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialSuccess => 2,
            RunStatus::Failure => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectReport {
    pub status: RunStatus,
    pub window: DateWindow,
    pub sources: Vec<SourceOutcome>,
    pub fetched: usize,
    pub merged: usize,
    pub load: LoadReport,
}

impl CollectReport {
    pub fn new(run: CollectionRun, load: LoadReport) -> Self {
        let status = if run.all_failed() {
            RunStatus::Failure
        } else if run.is_partial() || !load.skipped.is_empty() {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        };
        Self {
            status,
            window: run.window,
            sources: run.outcomes,
            fetched: run.fetched,
            merged: run.merged,
            load,
        }
    }

    pub fn failed_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(|outcome| outcome.source.as_str())
            .collect()
    }
}
