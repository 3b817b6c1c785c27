pub mod loader;
pub mod policy;

pub use loader::{GraphLoader, LoadError, LoadReport, RecordStatus, SkippedRecord};
pub use policy::{CleaningPolicy, NoOpPolicy, PolicyError, RecordPolicy};
