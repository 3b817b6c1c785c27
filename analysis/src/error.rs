use thiserror::Error;
use vulngraph_core::error::{ErrorCode, VulngraphError};

/// Caller contract violations. Negative search results are
/// [`PathOutcome`](crate::PathOutcome) variants, not errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("traversal depth must be bounded")]
    DepthUnbounded,
    #[error("depth {requested} exceeds the configured maximum of {max}")]
    DepthTooLarge { requested: u32, max: u32 },
    #[error("{0} is not in the graph")]
    NotFound(String),
    #[error("{0} is not a software or version key")]
    InvalidTarget(String),
    #[error("analysis cancelled")]
    Cancelled,
}

impl VulngraphError for AnalysisError {
    fn error_code(&self) -> ErrorCode {
        match self {
            AnalysisError::DepthUnbounded
            | AnalysisError::DepthTooLarge { .. }
            | AnalysisError::InvalidTarget(_) => ErrorCode::InvalidArgument,
            AnalysisError::NotFound(_) => ErrorCode::NotFound,
            AnalysisError::Cancelled => ErrorCode::Cancelled,
        }
    }
}
