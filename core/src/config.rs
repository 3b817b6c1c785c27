use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const KNOWN_SOURCES: [&str; 4] = ["nvd", "github", "redhat", "debian"];

fn default_true() -> bool {
    true
}

fn default_delay() -> f64 {
    6.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    30
}

fn default_overall_timeout() -> u64 {
    600
}

fn default_page_size() -> u32 {
    2000
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key or bearer token, depending on the source.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Minimum spacing between two requests to this source, in seconds.
    #[serde(default = "default_delay")]
    pub delay_between_requests: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Upper bound on one window fetch including retries, in seconds.
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Debian only: releases to keep.
    #[serde(default)]
    pub releases: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            api_key: None,
            delay_between_requests: default_delay(),
            max_retries: default_max_retries(),
            timeout: default_timeout(),
            overall_timeout: default_overall_timeout(),
            page_size: default_page_size(),
            releases: Vec::new(),
        }
    }
}

impl SourceConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_requests.max(0.0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Directory holding the graph journal.
    pub uri: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: "data/graph".to_string(),
            username: None,
            password: None,
        }
    }
}

fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Apply the cleaning policy (HTML stripping, whitespace collapse) before load.
    #[serde(default = "default_true")]
    pub clean_records: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            clean_records: true,
        }
    }
}

fn default_max_depth() -> u32 {
    10
}

fn default_depth() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_depth")]
    pub max_traversal_depth: u32,
    #[serde(default = "default_max_depth")]
    pub max_path_hops: u32,
    #[serde(default = "default_depth")]
    pub default_depth: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: default_max_depth(),
            max_path_hops: default_max_depth(),
            default_depth: default_depth(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CvssPreference {
    /// Keep the vector with the most `metric:value` components.
    MostComplete,
    /// Keep the vector from the highest-priority source.
    SourcePriority,
}

fn default_priority() -> Vec<String> {
    KNOWN_SOURCES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MergeConfig {
    #[serde(default = "default_true")]
    pub prefer_non_empty: bool,
    #[serde(default = "default_cvss_preference")]
    pub cvss: CvssPreference,
    #[serde(default = "default_priority")]
    pub source_priority: Vec<String>,
}

fn default_cvss_preference() -> CvssPreference {
    CvssPreference::MostComplete
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            prefer_non_empty: true,
            cvss: CvssPreference::MostComplete,
            source_priority: default_priority(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("VULNGRAPH").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: AppConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("VULNGRAPH").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingestion.batch_size == 0 {
            return Err(ConfigError::Message(
                "ingestion.batch_size must be greater than zero".into(),
            ));
        }
        if self.analysis.max_traversal_depth == 0 || self.analysis.max_path_hops == 0 {
            return Err(ConfigError::Message(
                "analysis bounds must be greater than zero".into(),
            ));
        }
        if self.analysis.default_depth > self.analysis.max_traversal_depth {
            return Err(ConfigError::Message(format!(
                "analysis.default_depth {} exceeds max_traversal_depth {}",
                self.analysis.default_depth, self.analysis.max_traversal_depth
            )));
        }
        for (name, source) in &self.sources {
            if !KNOWN_SOURCES.contains(&name.as_str()) {
                return Err(ConfigError::Message(format!("unknown source `{name}`")));
            }
            if !source.delay_between_requests.is_finite() || source.delay_between_requests < 0.0 {
                return Err(ConfigError::Message(format!(
                    "sources.{name}.delay_between_requests must be a non-negative number"
                )));
            }
        }
        for name in &self.merge.source_priority {
            if !KNOWN_SOURCES.contains(&name.as_str()) {
                return Err(ConfigError::Message(format!(
                    "unknown source `{name}` in merge.source_priority"
                )));
            }
        }
        Ok(())
    }

    /// Names of the sources that are configured and enabled.
    pub fn enabled_sources(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vulngraph.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[sources.nvd]
delay_between_requests = 0.6
api_key = "secret"

[sources.debian]
enabled = false
releases = ["bookworm"]

[database]
uri = "/tmp/graph"

[analysis]
max_traversal_depth = 4
max_path_hops = 6
default_depth = 1
"#
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        let nvd = &config.sources["nvd"];
        assert_eq!(nvd.max_retries, 3);
        assert_eq!(nvd.timeout, 30);
        assert_eq!(nvd.api_key.as_deref(), Some("secret"));
        assert_eq!(config.enabled_sources(), vec!["nvd".to_string()]);
        assert_eq!(config.ingestion.batch_size, 100);
        assert_eq!(config.analysis.max_traversal_depth, 4);
        assert_eq!(config.merge.cvss, CvssPreference::MostComplete);
        assert_eq!(config.merge.source_priority[0], "nvd");
    }

    #[test]
    fn test_partial_analysis_table_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vulngraph.toml");
        std::fs::write(&path, "[analysis]\nmax_traversal_depth = 4\n").unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.analysis.max_traversal_depth, 4);
        assert_eq!(config.analysis.max_path_hops, 10);
        assert_eq!(config.analysis.default_depth, 1);
    }

    #[test]
    fn test_validate_rejects_unknown_source_and_zero_batch() {
        let mut config = AppConfig::default();
        config.sources.insert("osv".into(), SourceConfig::default());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ingestion.batch_size = 0;
        assert!(config.validate().is_err());

        assert!(AppConfig::default().validate().is_ok());
    }
}
