//! Argument definitions. Parsing only, no I/O.

use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Collect vulnerability advisories into a reuse graph and analyze their reach.
#[derive(Parser, Debug)]
#[command(name = "vulngraph", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file. Without it, `config/default.toml` and
    /// `VULNGRAPH__*` environment variables are used.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the log filter (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "json")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch advisories for a date window and load them into the graph.
    Collect(CollectArgs),

    /// List the software versions a vulnerability reaches through reuse.
    Impact(ImpactArgs),

    /// Find the reuse chain from a vulnerability to a target component.
    Path(PathArgs),

    /// Print node and edge counts of the graph store.
    Stats,
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Sources to run, comma separated. Defaults to every enabled source.
    #[arg(short, long, value_delimiter = ',')]
    pub sources: Vec<String>,

    /// Window start, `YYYY-MM-DD` or RFC 3339.
    #[arg(long, value_parser = parse_date, required_unless_present = "days")]
    pub start: Option<DateTime<Utc>>,

    /// Window end, `YYYY-MM-DD` or RFC 3339. Defaults to now.
    #[arg(long, value_parser = parse_date)]
    pub end: Option<DateTime<Utc>>,

    /// Incremental run over the last N days, ending now.
    #[arg(long, conflicts_with_all = ["start", "end"], value_parser = clap::value_parser!(u32).range(1..))]
    pub days: Option<u32>,
}

impl CollectArgs {
    /// Resolve the fetch window against `now`.
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match (self.days, self.start) {
            (Some(days), _) => (now - Duration::days(i64::from(days)), now),
            (None, Some(start)) => (start, self.end.unwrap_or(now)),
            (None, None) => (now, now),
        }
    }
}

#[derive(Args, Debug)]
pub struct ImpactArgs {
    /// Vulnerability id, e.g. CVE-2024-0001.
    pub vuln_id: String,

    /// Maximum number of reuse hops. Defaults to `analysis.default_depth`.
    #[arg(short, long)]
    pub depth: Option<u32>,
}

#[derive(Args, Debug)]
pub struct PathArgs {
    /// Vulnerability id, e.g. CVE-2024-0001.
    pub vuln_id: String,

    /// Target as `[author/]name[@version]`.
    pub target: String,

    /// Hop bound. Defaults to `analysis.max_path_hops`.
    #[arg(long)]
    pub max_hops: Option<u32>,
}

/// Accept a bare date (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("`{raw}` is neither YYYY-MM-DD nor RFC 3339: {e}"))
}
