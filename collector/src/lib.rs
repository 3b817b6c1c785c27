pub mod adapter;
pub mod error;
pub mod http;
pub mod merge;
pub mod orchestrator;
pub mod sources;
pub mod throttle;
pub mod window;

pub use adapter::SourceAdapter;
pub use error::SourceError;
pub use merge::RecordMerger;
pub use orchestrator::{CollectionOrchestrator, CollectionRun, SourceOutcome, SourceStatus};
pub use throttle::{RequestPolicy, RetryPolicy};
pub use window::DateWindow;
