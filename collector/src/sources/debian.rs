//! Debian Security Tracker JSON export.
//!
//! The export is one document keyed by source package, then by issue id. It
//! carries no per-issue timestamps, so a window selects CVEs by the year in
//! their identifier.

use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::http::SourceClient;
use crate::window::DateWindow;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vulngraph_core::config::SourceConfig;
use vulngraph_core::record::{AffectedDescriptor, NormalizedRecord};

pub const DEFAULT_BASE_URL: &str = "https://security-tracker.debian.org/tracker/data/json";
pub const DEFAULT_RELEASES: [&str; 3] = ["buster", "bullseye", "bookworm"];
const AUTHOR: &str = "debian";

type TrackerExport = BTreeMap<String, BTreeMap<String, Issue>>;

#[derive(Debug, Deserialize)]
struct Issue {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    debianbug: Option<u64>,
    #[serde(default)]
    releases: BTreeMap<String, ReleaseStatus>,
}

#[derive(Debug, Deserialize)]
struct ReleaseStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    fixed_version: Option<String>,
    #[serde(default)]
    urgency: Option<String>,
    #[serde(default)]
    repositories: BTreeMap<String, String>,
}

pub struct DebianAdapter {
    client: SourceClient,
    url: String,
    releases: Vec<String>,
}

impl DebianAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let releases = if config.releases.is_empty() {
            DEFAULT_RELEASES.iter().map(|r| r.to_string()).collect()
        } else {
            config.releases.clone()
        };
        Ok(Self {
            client: SourceClient::new("debian", config)?,
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            releases,
        })
    }

    fn normalize(&self, export: TrackerExport, window: &DateWindow) -> Vec<NormalizedRecord> {
        let years = window.years();
        let mut by_cve: BTreeMap<String, NormalizedRecord> = BTreeMap::new();

        for (package, issues) in export {
            for (issue_id, issue) in issues {
                let Some(year) = cve_year(&issue_id) else {
                    continue;
                };
                if !years.contains(&year) {
                    continue;
                }

                let record = by_cve
                    .entry(issue_id.clone())
                    .or_insert_with(|| NormalizedRecord::new("debian", issue_id.as_str()));
                if record.description.is_empty() {
                    record.description = issue.description.clone().unwrap_or_default();
                }
                if let Some(scope) = &issue.scope {
                    record.metadata.insert("scope".to_string(), scope.clone());
                }
                if let Some(bug) = issue.debianbug {
                    record
                        .metadata
                        .insert(format!("debianbug:{package}"), bug.to_string());
                }

                for release in &self.releases {
                    let Some(status) = issue.releases.get(release) else {
                        continue;
                    };
                    match status.status.as_str() {
                        "open" | "undetermined" => {
                            let version = status
                                .repositories
                                .get(release)
                                .or_else(|| status.repositories.values().next())
                                .cloned();
                            let affected = AffectedDescriptor {
                                software_name: package.clone(),
                                software_author: AUTHOR.to_string(),
                                software_url: None,
                                version_string: version,
                            };
                            if !record.affected.contains(&affected) {
                                record.affected.push(affected);
                            }
                        }
                        "resolved" => {
                            if let Some(fixed) = &status.fixed_version {
                                record
                                    .metadata
                                    .insert(format!("fixed:{release}:{package}"), fixed.clone());
                            }
                        }
                        _ => {}
                    }
                    if let Some(urgency) = &status.urgency {
                        record
                            .metadata
                            .insert(format!("urgency:{release}:{package}"), urgency.clone());
                    }
                }
            }
        }

        by_cve.into_values().collect()
    }

    async fn fetch_export(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        let export: TrackerExport = self
            .client
            .get_json(&self.url, &[], &[("accept", "application/json".to_string())], cancel)
            .await?;
        let records = self.normalize(export, &window);
        info!(source = "debian", window = %window, records = records.len(), "window fetched");
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for DebianAdapter {
    fn source(&self) -> &str {
        "debian"
    }

    async fn fetch_window(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        self.client
            .policy()
            .bounded(self.fetch_export(window, cancel))
            .await
    }
}

fn cve_year(issue_id: &str) -> Option<i32> {
    issue_id
        .strip_prefix("CVE-")?
        .split('-')
        .next()?
        .parse()
        .ok()
}
