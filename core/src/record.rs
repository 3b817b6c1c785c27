//! Normalized ingestion record: the one shape every source adapter emits and
//! the graph loader consumes.

use crate::model::{
    to_timestamp, CvssMetric, NaturalKey, NodeData, PatchData, SoftwareData, VersionData,
    VulnerabilityData,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvssScore {
    pub version: String,
    pub score: f32,
    pub vector: String,
}

impl CvssScore {
    /// `2` or `3`; anything unparseable is treated as v3.
    pub fn major(&self) -> u8 {
        let version = self.version.trim();
        let version = version.strip_prefix("CVSS:").unwrap_or(version);
        if version.starts_with('2') {
            2
        } else {
            3
        }
    }

    /// Number of `metric:value` components in the vector string.
    pub fn completeness(&self) -> usize {
        self.vector
            .split('/')
            .filter(|part| {
                part.split_once(':')
                    .is_some_and(|(metric, value)| !metric.is_empty() && !value.is_empty() && metric != "CVSS")
            })
            .count()
    }

    fn to_metric(&self) -> CvssMetric {
        CvssMetric {
            version: self.version.clone(),
            score: self.score,
            vector: self.vector.clone(),
        }
    }
}

/// Reference to a software component, optionally at a specific version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentRef {
    pub software_name: String,
    #[serde(default)]
    pub software_author: String,
    #[serde(default)]
    pub software_url: Option<String>,
    #[serde(default)]
    pub version_string: Option<String>,
}

impl ComponentRef {
    pub fn software(name: &str, author: &str) -> Self {
        Self {
            software_name: name.to_string(),
            software_author: author.to_string(),
            software_url: None,
            version_string: None,
        }
    }

    pub fn version(name: &str, author: &str, version: &str) -> Self {
        Self {
            version_string: Some(version.to_string()),
            ..Self::software(name, author)
        }
    }

    /// `(name, author)` the software is keyed on. A repository URL on a
    /// known forge wins over the spelled name, as `(repo, owner)`, the same
    /// identity patch fix components use.
    fn identity(&self) -> (&str, &str) {
        self.software_url
            .as_deref()
            .and_then(repository_identity)
            .unwrap_or((self.software_name.as_str(), self.software_author.as_str()))
    }

    pub fn software_key(&self) -> NaturalKey {
        let (name, author) = self.identity();
        NaturalKey::software(name, author)
    }

    pub fn version_key(&self) -> Option<NaturalKey> {
        let (name, author) = self.identity();
        self.version_string
            .as_deref()
            .filter(|version| !version.trim().is_empty())
            .map(|version| NaturalKey::version(name, author, version))
    }

    /// Most specific key: the version when present, else the software.
    pub fn key(&self) -> NaturalKey {
        self.version_key().unwrap_or_else(|| self.software_key())
    }

    pub fn software_data(&self) -> NodeData {
        NodeData::Software(SoftwareData {
            name: self.software_name.trim().to_string(),
            author: self.software_author.trim().to_string(),
            url: self.software_url.clone(),
        })
    }
}

pub type AffectedDescriptor = ComponentRef;

const FORGES: [&str; 3] = ["github.com", "gitlab.com", "bitbucket.org"];

/// `(repo, owner)` of `[scheme://][www.]<forge>/<owner>/<repo>[...]`.
pub fn repository_identity(url: &str) -> Option<(&str, &str)> {
    let url = url.trim();
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    let mut segments = rest.split(['/', '?', '#']);
    let host = segments.next()?;
    if !FORGES.iter().any(|forge| host.eq_ignore_ascii_case(forge)) {
        return None;
    }
    let owner = segments.next().filter(|s| !s.is_empty())?;
    let repo = segments.next().map(|s| s.trim_end_matches(".git"))?;
    if repo.is_empty() {
        return None;
    }
    Some((repo, owner))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatchDescriptor {
    pub repo_owner: String,
    pub repo_name: String,
    pub commit_id: String,
    #[serde(default)]
    pub fix_cve_id: String,
    #[serde(default)]
    pub commit_date: Option<DateTime<Utc>>,
    /// Version label the fix landed in; the commit id when absent.
    #[serde(default)]
    pub fixed_version: Option<String>,
}

impl PatchDescriptor {
    pub fn key(&self) -> NaturalKey {
        NaturalKey::patch(&self.repo_owner, &self.repo_name, &self.commit_id)
    }

    /// The repository component the fix lives in.
    pub fn fix_component(&self) -> ComponentRef {
        let version = self
            .fixed_version
            .clone()
            .filter(|version| !version.trim().is_empty())
            .unwrap_or_else(|| self.commit_id.clone());
        ComponentRef::version(&self.repo_name, &self.repo_owner, &version)
    }

    pub fn patch_data(&self, fallback_cve_id: &str) -> NodeData {
        let fix_cve_id = if self.fix_cve_id.trim().is_empty() {
            fallback_cve_id
        } else {
            self.fix_cve_id.trim()
        };
        NodeData::Patch(PatchData {
            repo_owner: self.repo_owner.trim().to_string(),
            repo_name: self.repo_name.trim().to_string(),
            commit_id: self.commit_id.trim().to_string(),
            fix_cve_id: fix_cve_id.to_uppercase(),
            commit_date: self.commit_date.map(to_timestamp),
        })
    }

    pub fn fix_version_data(&self) -> NodeData {
        let component = self.fix_component();
        NodeData::Version(VersionData {
            version: component.version_string.unwrap_or_default(),
            tag: self.fixed_version.clone(),
            commit_date: self.commit_date.map(to_timestamp),
            repo_name: Some(self.repo_name.trim().to_string()),
            author: Some(self.repo_owner.trim().to_string()),
        })
    }
}

/// `from` reuses code of `to`; both ends at the same granularity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReuseDescriptor {
    pub from: ComponentRef,
    pub to: ComponentRef,
    #[serde(default)]
    pub commit_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub vuln_id: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub published_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cpes: Vec<String>,
    #[serde(default)]
    pub cwe: Vec<String>,
    #[serde(default)]
    pub cvss: Vec<CvssScore>,
    #[serde(default)]
    pub affected: Vec<AffectedDescriptor>,
    #[serde(default)]
    pub patches: Vec<PatchDescriptor>,
    #[serde(default)]
    pub reuse: Vec<ReuseDescriptor>,
    /// Source fields the graph does not model yet.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NormalizedRecord {
    pub fn new(source: impl Into<String>, vuln_id: impl Into<String>) -> Self {
        Self {
            vuln_id: vuln_id.into(),
            sources: vec![source.into()],
            published_date: None,
            last_modified_date: None,
            description: String::new(),
            cpes: Vec::new(),
            cwe: Vec::new(),
            cvss: Vec::new(),
            affected: Vec::new(),
            patches: Vec::new(),
            reuse: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> NaturalKey {
        NaturalKey::vulnerability(&self.vuln_id)
    }

    pub fn cvss_for(&self, major: u8) -> Option<&CvssScore> {
        self.cvss.iter().find(|score| score.major() == major)
    }

    pub fn vulnerability_data(&self) -> NodeData {
        let mut cpes = self.cpes.clone();
        cpes.sort();
        cpes.dedup();
        let mut cwes = self.cwe.clone();
        cwes.sort();
        cwes.dedup();
        let mut sources = self.sources.clone();
        sources.sort();
        sources.dedup();

        NodeData::Vulnerability(VulnerabilityData {
            published: self.published_date.map(to_timestamp),
            last_modified: self.last_modified_date.map(to_timestamp),
            description: self.description.clone(),
            cpes,
            cwes,
            cvss_v2: self.cvss_for(2).map(CvssScore::to_metric),
            cvss_v3: self.cvss_for(3).map(CvssScore::to_metric),
            sources,
        })
    }
}

pub fn version_data(component: &ComponentRef) -> Option<NodeData> {
    let version = component.version_string.as_deref()?.trim();
    if version.is_empty() {
        return None;
    }
    Some(NodeData::Version(VersionData {
        version: version.to_string(),
        tag: None,
        commit_date: None,
        repo_name: None,
        author: None,
    }))
}
