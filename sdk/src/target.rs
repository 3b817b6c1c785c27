use crate::error::SdkError;
use vulngraph_core::model::NaturalKey;

/// Parse `[author/]name[@version]` into a software or version key.
pub fn parse_target(raw: &str) -> Result<NaturalKey, SdkError> {
    let raw = raw.trim();
    let (component, version) = match raw.rsplit_once('@') {
        Some((component, version)) => (component, Some(version.trim())),
        None => (raw, None),
    };
    let (author, name) = component.split_once('/').unwrap_or(("", component));

    if name.trim().is_empty() {
        return Err(SdkError::InvalidArgument(format!(
            "target `{raw}` has no software name"
        )));
    }
    match version {
        Some("") => Err(SdkError::InvalidArgument(format!(
            "target `{raw}` has an empty version"
        ))),
        Some(version) => Ok(NaturalKey::version(name, author, version)),
        None => Ok(NaturalKey::software(name, author)),
    }
}
