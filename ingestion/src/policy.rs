use thiserror::Error;
use vulngraph_core::record::{ComponentRef, NormalizedRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("record has no vulnerability id")]
    MissingVulnerabilityId,
    #[error("affected entry without a software name")]
    MissingSoftwareName,
}

/// Applied to every record before it is turned into graph writes.
pub trait RecordPolicy: Send + Sync {
    fn apply(&self, record: NormalizedRecord) -> Result<NormalizedRecord, PolicyError>;
}

pub struct NoOpPolicy;

impl RecordPolicy for NoOpPolicy {
    fn apply(&self, record: NormalizedRecord) -> Result<NormalizedRecord, PolicyError> {
        Ok(record)
    }
}

/// Normalizes free text and identifiers coming from heterogeneous feeds.
#[derive(Debug, Clone, Default)]
pub struct CleaningPolicy;

impl RecordPolicy for CleaningPolicy {
    fn apply(&self, mut record: NormalizedRecord) -> Result<NormalizedRecord, PolicyError> {
        record.vuln_id = record.vuln_id.trim().to_uppercase();
        if record.vuln_id.is_empty() {
            return Err(PolicyError::MissingVulnerabilityId);
        }

        record.description = clean_description(&record.description);
        record.cpes = dedup_trimmed(record.cpes);
        record.cwe = dedup_trimmed(record.cwe.into_iter().map(|c| c.to_uppercase()).collect());
        record.sources = dedup_trimmed(record.sources);

        let mut affected = Vec::with_capacity(record.affected.len());
        for component in record.affected {
            let component = clean_component(component);
            if component.software_name.is_empty() {
                return Err(PolicyError::MissingSoftwareName);
            }
            if !affected.contains(&component) {
                affected.push(component);
            }
        }
        record.affected = affected;

        for patch in &mut record.patches {
            patch.repo_owner = patch.repo_owner.trim().to_string();
            patch.repo_name = patch.repo_name.trim().to_string();
            patch.commit_id = patch.commit_id.trim().to_string();
            patch.fix_cve_id = patch.fix_cve_id.trim().to_uppercase();
        }
        let mut seen = Vec::new();
        record.patches.retain(|patch| {
            let key = patch.key();
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });

        for reuse in &mut record.reuse {
            reuse.from = clean_component(reuse.from.clone());
            reuse.to = clean_component(reuse.to.clone());
        }

        record.metadata.retain(|_, value| !value.trim().is_empty());
        Ok(record)
    }
}

/// Strip markup, drop non-printable characters and collapse whitespace.
/// A tag is a `<` closed by `>` with no other `<` in between; a bare `<`
/// such as in "versions < 2.4.1" is kept as text.
pub fn clean_description(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut pending: Option<String> = None;
    for c in raw.chars() {
        match c {
            '<' => {
                if let Some(stray) = pending.replace(String::new()) {
                    push_literal(&mut text, &stray);
                }
            }
            '>' => match pending.take() {
                Some(tag) if tag.is_empty() => text.push_str("<>"),
                Some(_) => text.push(' '),
                None => text.push('>'),
            },
            c => match pending.as_mut() {
                Some(tag) => tag.push(c),
                None => push_printable(&mut text, c),
            },
        }
    }
    if let Some(unclosed) = pending {
        push_literal(&mut text, &unclosed);
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Put back a `<` that turned out not to open a tag.
fn push_literal(text: &mut String, after_bracket: &str) {
    text.push('<');
    after_bracket.chars().for_each(|c| push_printable(text, c));
}

fn push_printable(text: &mut String, c: char) {
    if c.is_whitespace() {
        text.push(' ');
    } else if !c.is_control() {
        text.push(c);
    }
}

fn clean_component(mut component: ComponentRef) -> ComponentRef {
    component.software_name = component.software_name.trim().to_string();
    component.software_author = component.software_author.trim().to_string();
    component.version_string = component
        .version_string
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    component.software_url = component
        .software_url
        .map(|url| normalize_url(&url))
        .filter(|url| !url.is_empty());
    component
}

fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

fn dedup_trimmed(values: Vec<String>) -> Vec<String> {
    let mut values: Vec<String> = values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    values.sort();
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulngraph_core::record::AffectedDescriptor;

    #[test]
    fn test_clean_description_strips_markup() {
        assert_eq!(
            clean_description("  Heap <b>overflow</b>\n\tin\u{0007} parser  "),
            "Heap overflow in parser"
        );
        assert_eq!(clean_description("a<br/>b"), "a b");
        assert_eq!(clean_description("x < y"), "x < y");
    }

    #[test]
    fn test_clean_description_keeps_bare_angle_brackets() {
        assert_eq!(
            clean_description("Apache Foo versions < 2.4.1 allow remote attackers to execute code."),
            "Apache Foo versions < 2.4.1 allow remote attackers to execute code."
        );
        assert_eq!(
            clean_description("versions <= 1.2 fixed in <i>1.3</i>"),
            "versions <= 1.2 fixed in 1.3"
        );
        assert_eq!(clean_description("empty <> pair"), "empty <> pair");
    }

    #[test]
    fn test_cleaning_policy_normalizes_record() {
        let mut record = NormalizedRecord::new("nvd", " cve-2024-0001 ");
        record.cpes = vec!["cpe:b".into(), " cpe:a".into(), "cpe:b".into(), "".into()];
        record.cwe = vec!["cwe-79".into(), "CWE-79".into()];
        record.affected = vec![
            AffectedDescriptor::version(" libfoo ", "acme", " 1.0 "),
            AffectedDescriptor::version("libfoo", "acme", "1.0"),
        ];
        record.affected[0].software_url = Some("github.com/acme/libfoo/".into());

        let cleaned = CleaningPolicy.apply(record).unwrap();

        assert_eq!(cleaned.vuln_id, "CVE-2024-0001");
        assert_eq!(cleaned.cpes, vec!["cpe:a".to_string(), "cpe:b".to_string()]);
        assert_eq!(cleaned.cwe, vec!["CWE-79".to_string()]);
        assert_eq!(cleaned.affected.len(), 2);
        assert_eq!(cleaned.affected[0].software_name, "libfoo");
        assert_eq!(cleaned.affected[0].version_string.as_deref(), Some("1.0"));
        assert_eq!(
            cleaned.affected[0].software_url.as_deref(),
            Some("https://github.com/acme/libfoo")
        );
    }

    #[test]
    fn test_cleaning_policy_rejects_blank_identifiers() {
        let record = NormalizedRecord::new("nvd", "  ");
        assert_eq!(
            CleaningPolicy.apply(record).unwrap_err(),
            PolicyError::MissingVulnerabilityId
        );

        let mut record = NormalizedRecord::new("nvd", "CVE-2024-0001");
        record.affected = vec![AffectedDescriptor::software(" ", "acme")];
        assert_eq!(
            CleaningPolicy.apply(record).unwrap_err(),
            PolicyError::MissingSoftwareName
        );
    }
}
