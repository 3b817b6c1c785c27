use chrono::NaiveDate;
use collector::sources::debian::DebianAdapter;
use collector::{DateWindow, SourceAdapter};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use vulngraph_core::config::SourceConfig;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EXPORT_PATH: &str = "/tracker/data/json";

fn config(server: &MockServer, releases: &[&str]) -> SourceConfig {
    SourceConfig {
        base_url: Some(format!("{}{}", server.uri(), EXPORT_PATH)),
        delay_between_requests: 0.0,
        max_retries: 0,
        timeout: 5,
        overall_timeout: 30,
        releases: releases.iter().map(|r| r.to_string()).collect(),
        ..SourceConfig::default()
    }
}

fn window(start_year: i32, end_year: i32) -> DateWindow {
    DateWindow::from_dates(
        NaiveDate::from_ymd_opt(start_year, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(end_year, 1, 1).unwrap(),
    )
    .unwrap()
}

async fn serve_export(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(EXPORT_PATH))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "openssl": {
                "CVE-2024-1000": {
                    "description": "openssl crash",
                    "debianbug": 1050001,
                    "releases": {
                        "bookworm": {"status": "open", "repositories": {"bookworm": "3.0.11-1"}, "urgency": "medium"},
                        "bullseye": {"status": "open", "repositories": {"bullseye": "1.1.1w-0"}},
                        "sid": {"status": "resolved", "fixed_version": "3.0.13-1", "repositories": {"sid": "3.0.13-1"}}
                    }
                },
                "CVE-2023-5000": {
                    "description": "older issue",
                    "releases": {"bookworm": {"status": "open", "repositories": {"bookworm": "3.0.9-1"}}}
                }
            },
            "curl": {
                "CVE-2024-2000": {
                    "description": "curl leak",
                    "releases": {"bullseye": {"status": "open", "repositories": {"bullseye": "7.74.0-1"}}}
                }
            }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_keeps_configured_releases_and_window_years() {
    let server = MockServer::start().await;
    serve_export(&server).await;

    let adapter = DebianAdapter::new(&config(&server, &["bookworm"])).unwrap();
    let records = adapter
        .fetch_window(window(2024, 2025), &CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<_> = records.iter().map(|r| r.vuln_id.as_str()).collect();
    assert_eq!(ids, vec!["CVE-2024-1000", "CVE-2024-2000"]);

    let openssl = &records[0];
    assert_eq!(openssl.affected.len(), 1);
    assert_eq!(openssl.affected[0].version_string.as_deref(), Some("3.0.11-1"));
    assert_eq!(openssl.metadata["debianbug:openssl"], "1050001");
    assert_eq!(openssl.metadata["urgency:bookworm:openssl"], "medium");
    // sid is not a configured release
    assert!(!openssl.metadata.contains_key("fixed:sid:openssl"));

    // curl is only tracked for bullseye
    assert!(records[1].affected.is_empty());
}

#[tokio::test]
async fn test_multiple_releases_yield_one_component_per_version() {
    let server = MockServer::start().await;
    serve_export(&server).await;

    let adapter = DebianAdapter::new(&config(&server, &["bookworm", "bullseye"])).unwrap();
    let records = adapter
        .fetch_window(window(2023, 2025), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    let openssl = records
        .iter()
        .find(|r| r.vuln_id == "CVE-2024-1000")
        .unwrap();
    let versions: Vec<_> = openssl
        .affected
        .iter()
        .filter_map(|a| a.version_string.as_deref())
        .collect();
    assert_eq!(versions, vec!["3.0.11-1", "1.1.1w-0"]);
}

#[tokio::test]
async fn test_empty_window_skips_the_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = DebianAdapter::new(&config(&server, &["bookworm"])).unwrap();
    let records = adapter
        .fetch_window(window(2024, 2024), &CancellationToken::new())
        .await
        .unwrap();

    assert!(records.is_empty());
}
