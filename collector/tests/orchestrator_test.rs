use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use collector::{
    CollectionOrchestrator, DateWindow, RecordMerger, RequestPolicy, RetryPolicy, SourceAdapter,
    SourceError, SourceStatus,
};
use tokio_util::sync::CancellationToken;
use vulngraph_core::error::ErrorCode;
use vulngraph_core::record::{AffectedDescriptor, NormalizedRecord};

struct StaticAdapter {
    name: &'static str,
    records: Vec<NormalizedRecord>,
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn source(&self) -> &str {
        self.name
    }

    async fn fetch_window(
        &self,
        _window: DateWindow,
        _cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        Ok(self.records.clone())
    }
}

/// Every request fails transiently, so the policy eventually gives up.
struct FlakyAdapter {
    policy: RequestPolicy,
}

#[async_trait]
impl SourceAdapter for FlakyAdapter {
    fn source(&self) -> &str {
        "redhat"
    }

    async fn fetch_window(
        &self,
        _window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        self.policy
            .execute(cancel, || async {
                Err::<Vec<NormalizedRecord>, _>(SourceError::SourceUnavailable(
                    "connection reset".into(),
                ))
            })
            .await
    }
}

/// Never finishes on its own.
struct HangingAdapter;

#[async_trait]
impl SourceAdapter for HangingAdapter {
    fn source(&self) -> &str {
        "debian"
    }

    async fn fetch_window(
        &self,
        _window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        cancel.cancelled().await;
        Err(SourceError::Cancelled)
    }
}

fn window() -> DateWindow {
    DateWindow::from_dates(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
    )
    .unwrap()
}

fn record(source: &str, cve: &str, package: &str) -> NormalizedRecord {
    let mut record = NormalizedRecord::new(source, cve);
    record.affected = vec![AffectedDescriptor::version(package, "acme", "1.0")];
    record
}

fn flaky() -> FlakyAdapter {
    FlakyAdapter {
        policy: RequestPolicy::new(
            "redhat",
            Duration::from_millis(100),
            RetryPolicy {
                max_retries: 2,
                base_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(4),
                jitter: true,
            },
            Duration::from_secs(5),
            Duration::from_secs(60),
        ),
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_source_does_not_fail_the_run() {
    let healthy = StaticAdapter {
        name: "nvd",
        records: vec![
            record("nvd", "CVE-2024-0001", "libfoo"),
            record("nvd", "CVE-2024-0002", "libbar"),
        ],
    };
    let orchestrator = CollectionOrchestrator::new(
        vec![Arc::new(healthy), Arc::new(flaky())],
        RecordMerger::default(),
    );

    let run = orchestrator
        .collect(window(), None, &CancellationToken::new())
        .await;

    assert_eq!(run.records.len(), 2);
    assert_eq!(run.failed_sources(), vec!["redhat"]);
    assert!(run.is_partial());
    let failed = run.outcomes.iter().find(|o| o.source == "redhat").unwrap();
    match &failed.status {
        SourceStatus::Failed { code, reason } => {
            assert_eq!(*code, ErrorCode::ResourceExhausted);
            assert!(reason.contains("3 attempts"), "{reason}");
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn test_overlapping_sources_are_merged_per_vulnerability() {
    let nvd = StaticAdapter {
        name: "nvd",
        records: vec![record("nvd", "CVE-2024-0001", "libfoo")],
    };
    let mut github_record = record("github", "cve-2024-0001", "libfoo");
    github_record.description = "heap overflow".into();
    github_record.cwe = vec!["CWE-122".into()];
    let github = StaticAdapter {
        name: "github",
        records: vec![github_record],
    };
    let orchestrator =
        CollectionOrchestrator::new(vec![Arc::new(nvd), Arc::new(github)], RecordMerger::default());

    let run = orchestrator
        .collect(window(), None, &CancellationToken::new())
        .await;

    assert_eq!(run.fetched, 2);
    assert_eq!(run.records.len(), 1);
    let merged = &run.records[0];
    assert_eq!(merged.vuln_id, "CVE-2024-0001");
    assert_eq!(merged.description, "heap overflow");
    assert_eq!(merged.sources, vec!["github".to_string(), "nvd".to_string()]);
    assert_eq!(merged.affected.len(), 1);
}

#[tokio::test]
async fn test_cancellation_is_reported_per_source() {
    let orchestrator = CollectionOrchestrator::new(
        vec![
            Arc::new(StaticAdapter {
                name: "nvd",
                records: vec![record("nvd", "CVE-2024-0001", "libfoo")],
            }),
            Arc::new(HangingAdapter),
        ],
        RecordMerger::default(),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let run = orchestrator.collect(window(), None, &cancel).await;

    let debian = run.outcomes.iter().find(|o| o.source == "debian").unwrap();
    assert_eq!(debian.status, SourceStatus::Cancelled);
    assert_eq!(debian.records, 0);
    assert_eq!(run.records.len(), 1);
}

#[tokio::test]
async fn test_unknown_source_in_selection_is_reported() {
    let orchestrator = CollectionOrchestrator::new(
        vec![Arc::new(StaticAdapter {
            name: "nvd",
            records: vec![],
        })],
        RecordMerger::default(),
    );
    let only = vec!["nvd".to_string(), "osv".to_string()];

    let run = orchestrator
        .collect(window(), Some(&only), &CancellationToken::new())
        .await;

    assert_eq!(run.outcomes.len(), 2);
    assert_eq!(run.failed_sources(), vec!["osv"]);
}

#[tokio::test]
async fn test_reversed_bounds_are_rejected_before_fetching() {
    let adapter = StaticAdapter {
        name: "nvd",
        records: vec![record("nvd", "CVE-2024-0001", "libfoo")],
    };
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let err = adapter
        .fetch(start, end, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::InvalidDateRange { .. }));
}
