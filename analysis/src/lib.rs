pub mod engine;
pub mod error;
pub mod impact;
pub mod path;

pub use engine::AnalysisEngine;
pub use error::AnalysisError;
pub use impact::{ImpactEntry, ImpactReport};
pub use path::{PathOutcome, PathStep};
