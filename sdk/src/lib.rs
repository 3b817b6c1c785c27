pub mod client;
pub mod error;
pub mod report;
pub mod target;

pub use client::{CollectRequest, Vulngraph};
pub use error::SdkError;
pub use report::{CollectReport, RunStatus};
pub use target::parse_target;

pub use analysis::{ImpactEntry, ImpactReport, PathOutcome, PathStep};
pub use collector::{SourceOutcome, SourceStatus};
pub use storage::StoreStats;
pub use tokio_util::sync::CancellationToken;
