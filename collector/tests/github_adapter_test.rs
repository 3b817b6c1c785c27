use chrono::NaiveDate;
use collector::sources::github::GithubAdapter;
use collector::{DateWindow, SourceAdapter, SourceError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use vulngraph_core::config::SourceConfig;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_PATH: &str = "/graphql";

fn config(server: &MockServer, max_retries: u32) -> SourceConfig {
    SourceConfig {
        base_url: Some(format!("{}{}", server.uri(), API_PATH)),
        api_key: Some("gh-token".to_string()),
        delay_between_requests: 0.0,
        max_retries,
        timeout: 5,
        overall_timeout: 30,
        page_size: 2,
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

fn advisory(ghsa: &str, cve: &str, published: &str) -> Value {
    json!({
        "ghsaId": ghsa,
        "summary": format!("issue {cve}"),
        "description": "",
        "publishedAt": published,
        "identifiers": [
            {"type": "GHSA", "value": ghsa},
            {"type": "CVE", "value": cve}
        ],
        "vulnerabilities": {"nodes": [{
            "package": {"ecosystem": "PIP", "name": "widget"},
            "vulnerableVersionRange": "< 2.0"
        }]}
    })
}

fn page(nodes: Vec<Value>, next: Option<&str>) -> Value {
    json!({
        "data": {
            "securityAdvisories": {
                "pageInfo": {"hasNextPage": next.is_some(), "endCursor": next},
                "nodes": nodes
            }
        }
    })
}

#[tokio::test]
async fn test_follows_cursor_and_filters_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(header("authorization", "Bearer gh-token"))
        .and(body_partial_json(json!({"variables": {"after": "cursor-1"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![
                advisory("GHSA-0003", "CVE-2024-0003", "2024-01-20T00:00:00Z"),
                advisory("GHSA-0004", "CVE-2024-0004", "2024-02-02T00:00:00Z"),
            ],
            Some("cursor-2"),
        )))
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    let mut withdrawn = advisory("GHSA-0002", "CVE-2024-0002", "2024-01-10T00:00:00Z");
    withdrawn["withdrawnAt"] = json!("2024-01-12T00:00:00Z");
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![
                advisory("GHSA-0001", "CVE-2024-0001", "2024-01-05T00:00:00Z"),
                withdrawn,
            ],
            Some("cursor-1"),
        )))
        .expect(1)
        .with_priority(2)
        .mount(&server)
        .await;

    let adapter = GithubAdapter::new(&config(&server, 0)).unwrap();
    let records = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<_> = records.iter().map(|r| r.vuln_id.as_str()).collect();
    assert_eq!(ids, vec!["CVE-2024-0001", "CVE-2024-0003"]);
    assert_eq!(records[0].affected[0].software_author, "pip");
    assert_eq!(records[0].metadata["ghsa_id"], "GHSA-0001");
}

#[tokio::test]
async fn test_graphql_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded"}]
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![advisory("GHSA-0001", "CVE-2024-0001", "2024-01-05T00:00:00Z")],
            None,
        )))
        .expect(1)
        .with_priority(2)
        .mount(&server)
        .await;

    let adapter = GithubAdapter::new(&config(&server, 2)).unwrap();
    let records = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_graphql_query_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"type": "INVALID_CURSOR_ARGUMENTS", "message": "bad cursor"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = GithubAdapter::new(&config(&server, 3)).unwrap();
    let err = adapter
        .fetch_window(window(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::MalformedResponse(message) if message == "bad cursor"));
}
