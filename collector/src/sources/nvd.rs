//! NVD CVE API 2.0.

use super::{cwe_ids, parse_timestamp, patch_from_commit_url};
use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use crate::http::SourceClient;
use crate::window::DateWindow;
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vulngraph_core::config::SourceConfig;
use vulngraph_core::record::{AffectedDescriptor, CvssScore, NormalizedRecord};

pub const DEFAULT_BASE_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
/// Longest lastModified range the API accepts in one query.
pub const MAX_WINDOW_DAYS: i64 = 120;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CveResponse {
    #[serde(default)]
    results_per_page: usize,
    #[serde(default)]
    start_index: usize,
    #[serde(default)]
    total_results: usize,
    #[serde(default)]
    vulnerabilities: Vec<CveItem>,
}

#[derive(Debug, Deserialize)]
struct CveItem {
    cve: Cve,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cve {
    id: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    vuln_status: Option<String>,
    #[serde(default)]
    descriptions: Vec<LangString>,
    #[serde(default)]
    metrics: Metrics,
    #[serde(default)]
    weaknesses: Vec<Weakness>,
    #[serde(default)]
    configurations: Vec<Configuration>,
    #[serde(default)]
    references: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct LangString {
    lang: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Metrics {
    #[serde(default, rename = "cvssMetricV31")]
    v31: Vec<CvssMetric>,
    #[serde(default, rename = "cvssMetricV30")]
    v30: Vec<CvssMetric>,
    #[serde(default, rename = "cvssMetricV2")]
    v2: Vec<CvssMetric>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CvssMetric {
    cvss_data: CvssData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CvssData {
    version: String,
    vector_string: String,
    base_score: f32,
}

#[derive(Debug, Deserialize)]
struct Weakness {
    #[serde(default)]
    description: Vec<LangString>,
}

#[derive(Debug, Deserialize)]
struct Configuration {
    #[serde(default)]
    nodes: Vec<ConfigNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigNode {
    #[serde(default)]
    cpe_match: Vec<CpeMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpeMatch {
    #[serde(default)]
    vulnerable: bool,
    criteria: String,
    #[serde(default)]
    version_start_including: Option<String>,
    #[serde(default)]
    version_end_excluding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    url: String,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct NvdAdapter {
    client: SourceClient,
    base_url: String,
    api_key: Option<String>,
    page_size: u32,
}

impl NvdAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: SourceClient::new("nvd", config)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: config.api_key.clone(),
            page_size: config.page_size.clamp(1, 2000),
        })
    }

    async fn fetch_chunk(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        let mut headers = Vec::new();
        if let Some(key) = &self.api_key {
            headers.push(("apiKey", key.clone()));
        }

        let mut records = Vec::new();
        let mut start_index = 0usize;
        loop {
            let query = [
                (
                    "lastModStartDate",
                    window.start().to_rfc3339_opts(SecondsFormat::Millis, false),
                ),
                (
                    "lastModEndDate",
                    window.end().to_rfc3339_opts(SecondsFormat::Millis, false),
                ),
                ("resultsPerPage", self.page_size.to_string()),
                ("startIndex", start_index.to_string()),
            ];
            let page: CveResponse = self
                .client
                .get_json(&self.base_url, &query, &headers, cancel)
                .await?;

            let received = page.vulnerabilities.len();
            debug!(
                start_index = page.start_index,
                received,
                total = page.total_results,
                "nvd page"
            );
            for item in page.vulnerabilities {
                let record = normalize(item.cve);
                let in_window = record
                    .last_modified_date
                    .map_or(true, |modified| window.contains(modified));
                if in_window {
                    records.push(record);
                }
            }

            start_index += received;
            if received == 0 || start_index >= page.total_results {
                break;
            }
            if page.results_per_page == 0 {
                break;
            }
        }
        Ok(records)
    }

    async fn fetch_chunks(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        let mut records = Vec::new();
        for chunk in window.chunks(Duration::days(MAX_WINDOW_DAYS)) {
            if chunk.is_empty() {
                continue;
            }
            records.extend(self.fetch_chunk(chunk, cancel).await?);
        }
        info!(source = "nvd", window = %window, records = records.len(), "window fetched");
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for NvdAdapter {
    fn source(&self) -> &str {
        "nvd"
    }

    async fn fetch_window(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        self.client
            .policy()
            .bounded(self.fetch_chunks(window, cancel))
            .await
    }
}

fn normalize(cve: Cve) -> NormalizedRecord {
    let mut record = NormalizedRecord::new("nvd", cve.id.trim());
    record.published_date = cve.published.as_deref().and_then(parse_timestamp);
    record.last_modified_date = cve.last_modified.as_deref().and_then(parse_timestamp);
    record.description = cve
        .descriptions
        .iter()
        .find(|d| d.lang == "en")
        .or_else(|| cve.descriptions.first())
        .map(|d| d.value.clone())
        .unwrap_or_default();

    if let Some(metric) = cve.metrics.v31.first().or_else(|| cve.metrics.v30.first()) {
        record.cvss.push(score(&metric.cvss_data));
    }
    if let Some(metric) = cve.metrics.v2.first() {
        record.cvss.push(score(&metric.cvss_data));
    }

    for weakness in &cve.weaknesses {
        for description in &weakness.description {
            record.cwe.extend(cwe_ids(&description.value));
        }
    }
    record.cwe.sort();
    record.cwe.dedup();

    for node in cve.configurations.iter().flat_map(|c| &c.nodes) {
        for cpe in node.cpe_match.iter().filter(|m| m.vulnerable) {
            record.cpes.push(cpe.criteria.clone());
            if let Some(affected) = affected_from_cpe(&cpe.criteria) {
                if affected.version_string.is_none() {
                    let range = match (&cpe.version_start_including, &cpe.version_end_excluding) {
                        (Some(start), Some(end)) => Some(format!(">= {start}, < {end}")),
                        (None, Some(end)) => Some(format!("< {end}")),
                        (Some(start), None) => Some(format!(">= {start}")),
                        (None, None) => None,
                    };
                    if let Some(range) = range {
                        record
                            .metadata
                            .insert(format!("range:{}", affected.software_key()), range);
                    }
                }
                if !record.affected.contains(&affected) {
                    record.affected.push(affected);
                }
            }
        }
    }
    record.cpes.sort();
    record.cpes.dedup();

    for reference in cve
        .references
        .iter()
        .filter(|reference| reference.tags.iter().any(|tag| tag == "Patch"))
    {
        if let Some(patch) = patch_from_commit_url(&reference.url, &record.vuln_id) {
            if !record.patches.iter().any(|p| p.key() == patch.key()) {
                record.patches.push(patch);
            }
        } else {
            record
                .metadata
                .entry("patch_refs".to_string())
                .and_modify(|refs| {
                    refs.push('\n');
                    refs.push_str(&reference.url);
                })
                .or_insert_with(|| reference.url.clone());
        }
    }

    if let Some(status) = cve.vuln_status {
        record.metadata.insert("vuln_status".to_string(), status);
    }
    record
}

fn score(data: &CvssData) -> CvssScore {
    CvssScore {
        version: data.version.clone(),
        score: data.base_score,
        vector: data.vector_string.clone(),
    }
}

/// `cpe:2.3:part:vendor:product:version:...`; `*` and `-` versions mean the
/// whole product.
pub(crate) fn affected_from_cpe(criteria: &str) -> Option<AffectedDescriptor> {
    let fields = split_cpe(criteria);
    if fields.len() < 6 || fields[0] != "cpe" || fields[1] != "2.3" {
        return None;
    }
    let vendor = unescape(&fields[3]);
    let product = unescape(&fields[4]);
    if product.is_empty() || product == "*" {
        return None;
    }
    let version = match fields[5].as_str() {
        "*" | "-" | "" => None,
        other => Some(unescape(other)),
    };
    Some(AffectedDescriptor {
        software_name: product,
        software_author: if vendor == "*" { String::new() } else { vendor },
        software_url: None,
        version_string: version,
    })
}

/// Split on `:` that are not backslash-escaped.
fn split_cpe(criteria: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in criteria.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ':' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
