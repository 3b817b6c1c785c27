pub mod debian;
pub mod github;
pub mod nvd;
pub mod redhat;

pub use debian::DebianAdapter;
pub use github::GithubAdapter;
pub use nvd::NvdAdapter;
pub use redhat::RedHatAdapter;

use crate::adapter::SourceAdapter;
use crate::error::SourceError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use vulngraph_core::config::SourceConfig;
use vulngraph_core::record::PatchDescriptor;

pub fn build_adapter(
    name: &str,
    config: &SourceConfig,
) -> Result<Arc<dyn SourceAdapter>, SourceError> {
    let adapter: Arc<dyn SourceAdapter> = match name {
        "nvd" => Arc::new(NvdAdapter::new(config)?),
        "github" => Arc::new(GithubAdapter::new(config)?),
        "redhat" => Arc::new(RedHatAdapter::new(config)?),
        "debian" => Arc::new(DebianAdapter::new(config)?),
        other => return Err(SourceError::UnknownSource(other.to_string())),
    };
    Ok(adapter)
}

/// `https://github.com/<owner>/<repo>/commit/<sha>` into a patch descriptor.
pub(crate) fn patch_from_commit_url(url: &str, cve_id: &str) -> Option<PatchDescriptor> {
    let rest = url
        .trim()
        .strip_prefix("https://github.com/")
        .or_else(|| url.trim().strip_prefix("http://github.com/"))?;
    let mut parts = rest.split('/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    if parts.next()? != "commit" {
        return None;
    }
    let sha = parts
        .next()?
        .split(['#', '?'])
        .next()
        .unwrap_or_default();
    if owner.is_empty()
        || repo.is_empty()
        || sha.len() < 7
        || !sha.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }
    Some(PatchDescriptor {
        repo_owner: owner.to_string(),
        repo_name: repo.trim_end_matches(".git").to_string(),
        commit_id: sha.to_lowercase(),
        fix_cve_id: cve_id.to_string(),
        commit_date: None,
        fixed_version: None,
    })
}

/// Every `CWE-<n>` token in free text such as `(CWE-20|CWE-79)`.
pub(crate) fn cwe_ids(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find("CWE-") {
        let tail = &rest[pos + 4..];
        let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            out.push(format!("CWE-{digits}"));
        }
        rest = &tail[digits.len()..];
    }
    out.sort();
    out.dedup();
    out
}

/// Accepts RFC 3339, zone-less ISO timestamps (NVD) and bare dates.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
