use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use vulngraph_core::error::{ErrorCode, VulngraphError};

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("source exhausted after {attempts} attempts: {last}")]
    SourceExhausted { attempts: u32, last: Box<SourceError> },
    #[error("fetch cancelled")]
    Cancelled,
    #[error("fetch exceeded overall timeout of {0:?}")]
    TimedOut(Duration),
    #[error("unsupported source `{0}`")]
    UnknownSource(String),
}

impl SourceError {
    /// Transient failures that the request policy backs off and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::SourceUnavailable(_) | SourceError::RateLimited { .. }
        )
    }
}

impl VulngraphError for SourceError {
    fn error_code(&self) -> ErrorCode {
        match self {
            SourceError::SourceUnavailable(_) | SourceError::TimedOut(_) => ErrorCode::Unavailable,
            SourceError::RateLimited { .. } | SourceError::SourceExhausted { .. } => {
                ErrorCode::ResourceExhausted
            }
            SourceError::MalformedResponse(_) => ErrorCode::Internal,
            SourceError::InvalidDateRange { .. } | SourceError::UnknownSource(_) => {
                ErrorCode::InvalidArgument
            }
            SourceError::Cancelled => ErrorCode::Cancelled,
        }
    }
}
