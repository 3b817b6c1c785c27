use std::collections::BTreeMap;
use vulngraph_core::config::{CvssPreference, MergeConfig};
use vulngraph_core::model::NaturalKey;
use vulngraph_core::record::{CvssScore, NormalizedRecord};

/// Folds records that describe the same vulnerability into one.
///
/// Records are ordered by source priority first; the highest-priority record
/// is the base and the others fill it in.
#[derive(Debug, Clone)]
pub struct RecordMerger {
    config: MergeConfig,
}

impl Default for RecordMerger {
    fn default() -> Self {
        Self::new(MergeConfig::default())
    }
}

impl RecordMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    fn priority(&self, record: &NormalizedRecord) -> usize {
        record
            .sources
            .iter()
            .filter_map(|source| {
                self.config
                    .source_priority
                    .iter()
                    .position(|known| known == source)
            })
            .min()
            .unwrap_or(self.config.source_priority.len())
    }

    /// Deduplicate by vulnerability key. Output is ordered by key.
    pub fn merge_all(&self, records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
        let mut groups: BTreeMap<NaturalKey, Vec<NormalizedRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.key()).or_default().push(record);
        }

        groups
            .into_values()
            .filter_map(|mut group| {
                group.sort_by_key(|record| self.priority(record));
                let mut iter = group.into_iter();
                let mut base = iter.next()?;
                for other in iter {
                    self.merge_into(&mut base, other);
                }
                Some(base)
            })
            .collect()
    }

    /// Merge `other` into `base`; `base` is the preferred record.
    pub fn merge_into(&self, base: &mut NormalizedRecord, other: NormalizedRecord) {
        if self.config.prefer_non_empty && base.description.trim().is_empty() {
            base.description = other.description;
        }

        base.published_date = match (base.published_date, other.published_date) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        base.last_modified_date = match (base.last_modified_date, other.last_modified_date) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let mut cvss = Vec::new();
        for major in [3u8, 2u8] {
            let ours = base.cvss.iter().find(|s| s.major() == major).cloned();
            let theirs = other.cvss.iter().find(|s| s.major() == major).cloned();
            if let Some(score) = self.pick_cvss(ours, theirs) {
                cvss.push(score);
            }
        }
        base.cvss = cvss;

        union(&mut base.sources, other.sources);
        union(&mut base.cpes, other.cpes);
        union(&mut base.cwe, other.cwe);
        base.sources.sort();
        base.cpes.sort();
        base.cwe.sort();
        union(&mut base.affected, other.affected);
        for patch in other.patches {
            if !base.patches.iter().any(|p| p.key() == patch.key()) {
                base.patches.push(patch);
            }
        }
        union(&mut base.reuse, other.reuse);
        for (key, value) in other.metadata {
            base.metadata.entry(key).or_insert(value);
        }
    }

    fn pick_cvss(&self, ours: Option<CvssScore>, theirs: Option<CvssScore>) -> Option<CvssScore> {
        match (ours, theirs) {
            (Some(ours), Some(theirs)) => match self.config.cvss {
                CvssPreference::MostComplete if theirs.completeness() > ours.completeness() => {
                    Some(theirs)
                }
                _ => Some(ours),
            },
            (Some(ours), None) => Some(ours),
            (None, theirs) if self.config.prefer_non_empty => theirs,
            (None, _) => None,
        }
    }
}

fn union<T: PartialEq>(target: &mut Vec<T>, incoming: Vec<T>) {
    for item in incoming {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
