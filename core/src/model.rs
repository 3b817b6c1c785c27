use chrono::{DateTime, Utc};
use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;

/// Seconds since the Unix epoch. Journaled entities keep dates in this form.
pub type Timestamp = i64;

pub fn to_timestamp(value: DateTime<Utc>) -> Timestamp {
    value.timestamp()
}

pub fn from_timestamp(value: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value, 0)
}

/// Store-internal handle of a node. Stable across journal replays.
#[derive(
    Archive,
    Deserialize,
    Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[archive(check_bytes)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(
    Archive,
    Deserialize,
    Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Vulnerability,
    Software,
    Version,
    Patch,
}

#[derive(
    Archive,
    Deserialize,
    Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[archive(check_bytes)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Affects,
    AffectsVersion,
    HasVersion,
    Reuse,
    FixCve,
    FixVersion,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 6] = [
        EdgeKind::Affects,
        EdgeKind::AffectsVersion,
        EdgeKind::HasVersion,
        EdgeKind::Reuse,
        EdgeKind::FixCve,
        EdgeKind::FixVersion,
    ];

    /// Endpoint kinds permitted for this relationship.
    pub fn accepts(&self, from: NodeKind, to: NodeKind) -> bool {
        use NodeKind::*;
        match self {
            EdgeKind::Affects => from == Vulnerability && to == Software,
            EdgeKind::AffectsVersion => from == Vulnerability && to == Version,
            EdgeKind::HasVersion => from == Software && to == Version,
            EdgeKind::Reuse => from == to && matches!(from, Software | Version),
            EdgeKind::FixCve => from == Patch && to == Vulnerability,
            EdgeKind::FixVersion => from == Patch && to == Version,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::Affects => "AFFECTS",
            EdgeKind::AffectsVersion => "AFFECTS_VERSION",
            EdgeKind::HasVersion => "HAS_VERSION",
            EdgeKind::Reuse => "REUSE",
            EdgeKind::FixCve => "FIX_CVE",
            EdgeKind::FixVersion => "FIX_VERSION",
        };
        f.write_str(s)
    }
}

/// `(name, author)` identity of a software component, compared case-insensitively.
#[derive(
    Archive,
    Deserialize,
    Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[archive(check_bytes)]
pub struct SoftwareKey {
    pub name: String,
    pub author: String,
}

impl SoftwareKey {
    pub fn new(name: &str, author: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            author: author.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for SoftwareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.author.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.author, self.name)
        }
    }
}

/// Externally meaningful identity used for idempotent upserts.
#[derive(
    Archive,
    Deserialize,
    Serialize,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum NaturalKey {
    Vulnerability {
        cve_id: String,
    },
    Software(SoftwareKey),
    Version {
        software: SoftwareKey,
        version: String,
    },
    Patch {
        repo_owner: String,
        repo_name: String,
        commit_id: String,
    },
}

impl NaturalKey {
    pub fn vulnerability(cve_id: &str) -> Self {
        NaturalKey::Vulnerability {
            cve_id: cve_id.trim().to_uppercase(),
        }
    }

    pub fn software(name: &str, author: &str) -> Self {
        NaturalKey::Software(SoftwareKey::new(name, author))
    }

    pub fn version(name: &str, author: &str, version: &str) -> Self {
        NaturalKey::Version {
            software: SoftwareKey::new(name, author),
            version: version.trim().to_string(),
        }
    }

    pub fn patch(repo_owner: &str, repo_name: &str, commit_id: &str) -> Self {
        NaturalKey::Patch {
            repo_owner: repo_owner.trim().to_lowercase(),
            repo_name: repo_name.trim().to_lowercase(),
            commit_id: commit_id.trim().to_lowercase(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NaturalKey::Vulnerability { .. } => NodeKind::Vulnerability,
            NaturalKey::Software(_) => NodeKind::Software,
            NaturalKey::Version { .. } => NodeKind::Version,
            NaturalKey::Patch { .. } => NodeKind::Patch,
        }
    }

    /// Owning software of a version key.
    pub fn owner(&self) -> Option<NaturalKey> {
        match self {
            NaturalKey::Version { software, .. } => Some(NaturalKey::Software(software.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Vulnerability { cve_id } => f.write_str(cve_id),
            NaturalKey::Software(software) => write!(f, "{}", software),
            NaturalKey::Version { software, version } => write!(f, "{}@{}", software, version),
            NaturalKey::Patch {
                repo_owner,
                repo_name,
                commit_id,
            } => write!(f, "{}/{}#{}", repo_owner, repo_name, commit_id),
        }
    }
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct CvssMetric {
    pub version: String,
    pub score: f32,
    pub vector: String,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[archive(check_bytes)]
pub struct VulnerabilityData {
    pub published: Option<Timestamp>,
    pub last_modified: Option<Timestamp>,
    pub description: String,
    pub cpes: Vec<String>,
    pub cwes: Vec<String>,
    pub cvss_v2: Option<CvssMetric>,
    pub cvss_v3: Option<CvssMetric>,
    pub sources: Vec<String>,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[archive(check_bytes)]
pub struct SoftwareData {
    pub name: String,
    pub author: String,
    pub url: Option<String>,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[archive(check_bytes)]
pub struct VersionData {
    pub version: String,
    pub tag: Option<String>,
    pub commit_date: Option<Timestamp>,
    pub repo_name: Option<String>,
    pub author: Option<String>,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[archive(check_bytes)]
pub struct PatchData {
    pub repo_owner: String,
    pub repo_name: String,
    pub commit_id: String,
    pub fix_cve_id: String,
    pub commit_date: Option<Timestamp>,
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum NodeData {
    Vulnerability(VulnerabilityData),
    Software(SoftwareData),
    Version(VersionData),
    Patch(PatchData),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Vulnerability(_) => NodeKind::Vulnerability,
            NodeData::Software(_) => NodeKind::Software,
            NodeData::Version(_) => NodeKind::Version,
            NodeData::Patch(_) => NodeKind::Patch,
        }
    }

    /// Fold a re-ingested payload into the stored one. Mutable fields are
    /// last-write-wins, original dates are kept, sets are unioned.
    /// Returns whether anything changed.
    pub fn absorb(&mut self, incoming: NodeData) -> bool {
        let before = self.clone();
        match (&mut *self, incoming) {
            (NodeData::Vulnerability(current), NodeData::Vulnerability(incoming)) => {
                if current.published.is_none() {
                    current.published = incoming.published;
                }
                if incoming.last_modified.is_some() {
                    current.last_modified = incoming.last_modified;
                }
                if !incoming.description.is_empty() {
                    current.description = incoming.description;
                }
                union_sorted(&mut current.cpes, incoming.cpes);
                union_sorted(&mut current.cwes, incoming.cwes);
                union_sorted(&mut current.sources, incoming.sources);
                if current.cvss_v2.is_none() {
                    current.cvss_v2 = incoming.cvss_v2;
                }
                if current.cvss_v3.is_none() {
                    current.cvss_v3 = incoming.cvss_v3;
                }
            }
            (NodeData::Software(current), NodeData::Software(incoming)) => {
                if incoming.url.is_some() {
                    current.url = incoming.url;
                }
            }
            (NodeData::Version(current), NodeData::Version(incoming)) => {
                if current.commit_date.is_none() {
                    current.commit_date = incoming.commit_date;
                }
                if incoming.tag.is_some() {
                    current.tag = incoming.tag;
                }
                if incoming.repo_name.is_some() {
                    current.repo_name = incoming.repo_name;
                }
                if incoming.author.is_some() {
                    current.author = incoming.author;
                }
            }
            (NodeData::Patch(current), NodeData::Patch(incoming)) => {
                if current.commit_date.is_none() {
                    current.commit_date = incoming.commit_date;
                }
                if current.fix_cve_id.is_empty() {
                    current.fix_cve_id = incoming.fix_cve_id;
                }
            }
            _ => return false,
        }
        *self != before
    }
}

fn union_sorted(target: &mut Vec<String>, incoming: Vec<String>) {
    target.extend(incoming);
    target.sort();
    target.dedup();
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Node {
    pub id: NodeId,
    pub key: NaturalKey,
    pub data: NodeData,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.key.kind()
    }

    pub fn as_vulnerability(&self) -> Option<&VulnerabilityData> {
        match &self.data {
            NodeData::Vulnerability(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_software(&self) -> Option<&SoftwareData> {
        match &self.data {
            NodeData::Software(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Edge {
    pub kind: EdgeKind,
    pub source: NodeId,
    pub target: NodeId,
    /// Commit date of the change that introduced the relationship (REUSE).
    pub since: Option<Timestamp>,
}

impl Edge {
    pub fn new(kind: EdgeKind, source: NodeId, target: NodeId) -> Self {
        Self {
            kind,
            source,
            target,
            since: None,
        }
    }
}
