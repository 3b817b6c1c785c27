use chrono::NaiveDate;
use collector::sources::nvd::NvdAdapter;
use collector::{DateWindow, SourceAdapter, SourceError};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use vulngraph_core::config::SourceConfig;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_PATH: &str = "/rest/json/cves/2.0";

fn config(server: &MockServer, max_retries: u32) -> SourceConfig {
    SourceConfig {
        base_url: Some(format!("{}{}", server.uri(), API_PATH)),
        api_key: Some("test-key".to_string()),
        delay_between_requests: 0.0,
        max_retries,
        timeout: 5,
        overall_timeout: 30,
        page_size: 1,
        ..SourceConfig::default()
    }
}

fn window() -> DateWindow {
    DateWindow::from_dates(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
    )
    .unwrap()
}

fn cve(id: &str, product: &str, last_modified: &str) -> Value {
    json!({
        "cve": {
            "id": id,
            "published": "2024-01-02T10:00:00.000",
            "lastModified": last_modified,
            "descriptions": [{"lang": "en", "value": format!("flaw in {product}")}],
            "metrics": {
                "cvssMetricV31": [{
                    "cvssData": {
                        "version": "3.1",
                        "vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H",
                        "baseScore": 9.8
                    }
                }]
            },
            "configurations": [{
                "nodes": [{
                    "cpeMatch": [{
                        "vulnerable": true,
                        "criteria": format!("cpe:2.3:a:acme:{product}:1.0:*:*:*:*:*:*:*")
                    }]
                }]
            }]
        }
    })
}

fn page(start_index: usize, total: usize, items: Vec<Value>) -> Value {
    json!({
        "resultsPerPage": items.len(),
        "startIndex": start_index,
        "totalResults": total,
        "vulnerabilities": items
    })
}

#[tokio::test]
async fn test_pages_through_results_with_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .and(header("apiKey", "test-key"))
        .and(query_param("startIndex", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            0,
            2,
            vec![cve("CVE-2024-0001", "libfoo", "2024-01-05T00:00:00.000")],
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .and(header("apiKey", "test-key"))
        .and(query_param("startIndex", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            1,
            2,
            vec![cve("CVE-2024-0002", "libbar", "2024-01-06T00:00:00.000")],
        )))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = NvdAdapter::new(&config(&server, 0)).unwrap();
    let records = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].vuln_id, "CVE-2024-0001");
    assert_eq!(records[0].affected[0].software_name, "libfoo");
    assert_eq!(records[0].affected[0].version_string.as_deref(), Some("1.0"));
    assert_eq!(records[1].cvss[0].score, 9.8);
}

#[tokio::test]
async fn test_records_modified_outside_the_window_are_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            0,
            2,
            vec![
                cve("CVE-2024-0001", "libfoo", "2024-01-05T00:00:00.000"),
                cve("CVE-2023-9999", "libold", "2024-03-01T00:00:00.000"),
            ],
        )))
        .mount(&server)
        .await;

    let adapter = NvdAdapter::new(&config(&server, 0)).unwrap();
    let records = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].vuln_id, "CVE-2024-0001");
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            0,
            1,
            vec![cve("CVE-2024-0001", "libfoo", "2024-01-05T00:00:00.000")],
        )))
        .with_priority(2)
        .mount(&server)
        .await;

    let adapter = NvdAdapter::new(&config(&server, 2)).unwrap();
    let records = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_persistent_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let adapter = NvdAdapter::new(&config(&server, 1)).unwrap();
    let err = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        SourceError::SourceExhausted { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, SourceError::SourceUnavailable(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = NvdAdapter::new(&config(&server, 3)).unwrap();
    let err = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_overall_timeout_covers_the_whole_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(
                    0,
                    4,
                    vec![cve("CVE-2024-0001", "libfoo", "2024-01-05T00:00:00.000")],
                ))
                .set_delay(Duration::from_millis(700)),
        )
        .mount(&server)
        .await;

    let adapter = NvdAdapter::new(&SourceConfig {
        overall_timeout: 1,
        ..config(&server, 0)
    })
    .unwrap();
    let started = Instant::now();
    let err = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::TimedOut(_)));
    assert!(started.elapsed() < Duration::from_millis(1500));
}
