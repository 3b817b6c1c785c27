//! Red Hat Security Data API (`cve.json`).

use super::{cwe_ids, parse_timestamp};
use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::http::SourceClient;
use crate::window::DateWindow;
use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vulngraph_core::config::SourceConfig;
use vulngraph_core::record::{AffectedDescriptor, CvssScore, NormalizedRecord};

pub const DEFAULT_BASE_URL: &str = "https://access.redhat.com/hydra/rest/securitydata";
const AUTHOR: &str = "redhat";

#[derive(Debug, Deserialize)]
struct CveEntry {
    #[serde(rename = "CVE")]
    cve: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    public_date: Option<String>,
    #[serde(default)]
    bugzilla: Option<String>,
    #[serde(default)]
    bugzilla_description: Option<String>,
    #[serde(default, rename = "CWE")]
    cwe: Option<String>,
    #[serde(default)]
    cvss_score: Option<serde_json::Value>,
    #[serde(default)]
    cvss_scoring_vector: Option<String>,
    #[serde(default)]
    cvss3_score: Option<serde_json::Value>,
    #[serde(default)]
    cvss3_scoring_vector: Option<String>,
    #[serde(default)]
    affected_packages: Vec<String>,
    #[serde(default)]
    advisories: Vec<String>,
}

pub struct RedHatAdapter {
    client: SourceClient,
    base_url: String,
    page_size: u32,
}

impl RedHatAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: SourceClient::new("redhat", config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            page_size: config.page_size.max(1),
        })
    }

    async fn fetch_pages(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        let url = format!("{}/cve.json", self.base_url.trim_end_matches('/'));
        let after = (window.start() - Duration::days(1)).format("%Y-%m-%d").to_string();
        let before = (window.end() + Duration::days(1)).format("%Y-%m-%d").to_string();

        let mut records = Vec::new();
        let mut page = 1u32;
        loop {
            let query = [
                ("after", after.clone()),
                ("before", before.clone()),
                ("per_page", self.page_size.to_string()),
                ("page", page.to_string()),
            ];
            let entries: Vec<CveEntry> = self.client.get_json(&url, &query, &[], cancel).await?;
            let received = entries.len();
            debug!(page, received, "redhat page");

            for entry in entries {
                let record = normalize(entry);
                // the API filters by day; keep the exact half-open window
                if record.published_date.map_or(false, |date| window.contains(date)) {
                    records.push(record);
                }
            }

            if received < self.page_size as usize {
                break;
            }
            page += 1;
        }

        info!(source = "redhat", window = %window, records = records.len(), "window fetched");
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for RedHatAdapter {
    fn source(&self) -> &str {
        "redhat"
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

fn normalize(entry: CveEntry) -> NormalizedRecord {
    let mut record = NormalizedRecord::new("redhat", entry.cve.trim());
    record.published_date = entry.public_date.as_deref().and_then(parse_timestamp);
    record.description = entry.bugzilla_description.clone().unwrap_or_default();
    if let Some(cwe) = &entry.cwe {
        record.cwe = cwe_ids(cwe);
    }

    if let (Some(score), Some(vector)) = (
        entry.cvss3_score.as_ref().and_then(score_value),
        entry.cvss3_scoring_vector.clone(),
    ) {
        let version = vector
            .strip_prefix("CVSS:")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("3.0")
            .to_string();
        record.cvss.push(CvssScore {
            version,
            score,
            vector,
        });
    }
    if let (Some(score), Some(vector)) = (
        entry.cvss_score.as_ref().and_then(score_value),
        entry.cvss_scoring_vector.clone(),
    ) {
        record.cvss.push(CvssScore {
            version: "2.0".to_string(),
            score,
            vector,
        });
    }

    for package in &entry.affected_packages {
        if let Some(affected) = affected_from_nevra(package) {
            if !record.affected.contains(&affected) {
                record.affected.push(affected);
            }
        }
    }

    if let Some(severity) = entry.severity {
        record.metadata.insert("severity".to_string(), severity);
    }
    if let Some(bugzilla) = entry.bugzilla {
        record.metadata.insert("bugzilla".to_string(), bugzilla);
    }
    if !entry.advisories.is_empty() {
        record
            .metadata
            .insert("advisories".to_string(), entry.advisories.join(","));
    }
    record
}

/// Scores arrive either as numbers or as numeric strings.
fn score_value(value: &serde_json::Value) -> Option<f32> {
    match value {
        serde_json::Value::Number(number) => number.as_f64().map(|score| score as f32),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// `name-[epoch:]version-release` into package name and `version-release`.
pub(crate) fn affected_from_nevra(nevra: &str) -> Option<AffectedDescriptor> {
    let mut parts = nevra.trim().rsplitn(3, '-');
    let release = parts.next()?;
    let version = parts.next()?;
    let name = parts.next()?;
    if name.is_empty() || version.is_empty() || release.is_empty() {
        return None;
    }
    let version = version.split_once(':').map_or(version, |(_, v)| v);
    Some(AffectedDescriptor {
        software_name: name.to_string(),
        software_author: AUTHOR.to_string(),
        software_url: None,
        version_string: Some(format!("{version}-{release}")),
    })
}
