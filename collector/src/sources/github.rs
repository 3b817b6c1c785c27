//! GitHub Security Advisory database over GraphQL.

use super::{cwe_ids, parse_timestamp, patch_from_commit_url};
use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::http::SourceClient;
use crate::window::DateWindow;
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vulngraph_core::config::SourceConfig;
use vulngraph_core::record::{AffectedDescriptor, CvssScore, NormalizedRecord};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com/graphql";

const ADVISORY_QUERY: &str = r#"
query($first: Int!, $after: String, $since: DateTime!) {
  securityAdvisories(first: $first, after: $after, publishedSince: $since,
                     orderBy: {field: PUBLISHED_AT, direction: ASC}) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ghsaId
      summary
      description
      publishedAt
      updatedAt
      withdrawnAt
      identifiers { type value }
      references { url }
      cvss { score vectorString }
      cwes(first: 10) { nodes { cweId } }
      vulnerabilities(first: 25) {
        nodes {
          package { ecosystem name }
          vulnerableVersionRange
          firstPatchedVersion { identifier }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Data>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Data {
    security_advisories: Connection<Advisory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    #[serde(default)]
    page_info: Option<PageInfo>,
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Advisory {
    ghsa_id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    published_at: String,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    withdrawn_at: Option<String>,
    #[serde(default)]
    identifiers: Vec<Identifier>,
    #[serde(default)]
    references: Vec<Url>,
    #[serde(default)]
    cvss: Option<Cvss>,
    #[serde(default)]
    cwes: Option<Connection<Cwe>>,
    #[serde(default)]
    vulnerabilities: Option<Connection<Vulnerability>>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct Url {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cvss {
    score: f32,
    #[serde(default)]
    vector_string: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cwe {
    cwe_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Vulnerability {
    package: Package,
    #[serde(default)]
    vulnerable_version_range: Option<String>,
    #[serde(default)]
    first_patched_version: Option<PatchedVersion>,
}

#[derive(Debug, Deserialize)]
struct Package {
    ecosystem: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PatchedVersion {
    identifier: String,
}

pub struct GithubAdapter {
    client: SourceClient,
    base_url: String,
    token: Option<String>,
    page_size: u32,
}

impl GithubAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: SourceClient::new("github", config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            token: config.api_key.clone(),
            page_size: config.page_size.clamp(1, 100),
        })
    }

    async fn fetch_pages(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        let mut headers = Vec::new();
        if let Some(token) = &self.token {
            headers.push(("authorization", format!("Bearer {token}")));
        }

        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        'pages: loop {
            let request = GraphqlRequest {
                query: ADVISORY_QUERY,
                variables: json!({
                    "first": self.page_size,
                    "after": cursor,
                    "since": window.start().to_rfc3339_opts(SecondsFormat::Secs, true),
                }),
            };
            let connection = self
                .client
                .post_json(&self.base_url, &request, &headers, cancel, advisories)
                .await?;
            debug!(received = connection.nodes.len(), "github page");

            for advisory in connection.nodes {
                let Some(published) = parse_timestamp(&advisory.published_at) else {
                    continue;
                };
                // ascending by publication: nothing later can fall inside the window
                if published >= window.end() {
                    break 'pages;
                }
                if window.contains(published) && advisory.withdrawn_at.is_none() {
                    records.push(normalize(advisory));
                }
            }

            match connection.page_info {
                Some(PageInfo {
                    has_next_page: true,
                    end_cursor: Some(next),
                }) => cursor = Some(next),
                _ => break,
            }
        }

        info!(source = "github", window = %window, records = records.len(), "window fetched");
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for GithubAdapter {
    fn source(&self) -> &str {
        "github"
    }

    async fn fetch_window(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        self.client
            .policy()
            .bounded(self.fetch_pages(window, cancel))
            .await
    }
}

/// GraphQL reports throttling and query errors in a 200 body.
fn advisories(response: GraphqlResponse) -> Result<Connection<Advisory>, SourceError> {
    if let Some(error) = response.errors.first() {
        if error.kind.as_deref() == Some("RATE_LIMITED") {
            return Err(SourceError::RateLimited { retry_after: None });
        }
        return Err(SourceError::MalformedResponse(error.message.clone()));
    }
    response
        .data
        .map(|data| data.security_advisories)
        .ok_or_else(|| SourceError::MalformedResponse("response without data".into()))
}

fn normalize(advisory: Advisory) -> NormalizedRecord {
    let cve_id = advisory
        .identifiers
        .iter()
        .find(|identifier| identifier.kind == "CVE")
        .map(|identifier| identifier.value.clone())
        .unwrap_or_else(|| advisory.ghsa_id.clone());

    let mut record = NormalizedRecord::new("github", cve_id.trim());
    record.published_date = parse_timestamp(&advisory.published_at);
    record.last_modified_date = advisory.updated_at.as_deref().and_then(parse_timestamp);
    record.description = if advisory.description.trim().is_empty() {
        advisory.summary.clone()
    } else {
        advisory.description.clone()
    };
    record
        .metadata
        .insert("ghsa_id".to_string(), advisory.ghsa_id.clone());
    if !advisory.summary.is_empty() {
        record
            .metadata
            .insert("summary".to_string(), advisory.summary.clone());
    }

    if let Some(cvss) = advisory.cvss.filter(|cvss| cvss.score > 0.0) {
        let vector = cvss.vector_string.unwrap_or_default();
        let version = vector
            .strip_prefix("CVSS:")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("3.1")
            .to_string();
        record.cvss.push(CvssScore {
            version,
            score: cvss.score,
            vector,
        });
    }

    if let Some(cwes) = advisory.cwes {
        for cwe in cwes.nodes {
            record.cwe.extend(cwe_ids(&cwe.cwe_id));
        }
        record.cwe.sort();
        record.cwe.dedup();
    }

    for vulnerability in advisory.vulnerabilities.map(|c| c.nodes).unwrap_or_default() {
        let affected = AffectedDescriptor {
            software_name: vulnerability.package.name.clone(),
            software_author: vulnerability.package.ecosystem.to_lowercase(),
            software_url: None,
            version_string: None,
        };
        let package = affected.software_key();
        if let Some(range) = vulnerability.vulnerable_version_range {
            record.metadata.insert(format!("range:{package}"), range);
        }
        if let Some(patched) = vulnerability.first_patched_version {
            record
                .metadata
                .insert(format!("first_patched:{package}"), patched.identifier);
        }
        if !record.affected.contains(&affected) {
            record.affected.push(affected);
        }
    }

    for reference in &advisory.references {
        if let Some(patch) = patch_from_commit_url(&reference.url, &record.vuln_id) {
            if !record.patches.iter().any(|p| p.key() == patch.key()) {
                record.patches.push(patch);
            }
        }
    }

    record
}
