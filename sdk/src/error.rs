use analysis::AnalysisError;
use collector::SourceError;
use config::ConfigError;
use ingestion::LoadError;
use storage::StoreError;
use thiserror::Error;
use vulngraph_core::error::{ErrorCode, VulngraphError};

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("load error: {0}")]
    Load(#[from] LoadError),
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl VulngraphError for SdkError {
    fn error_code(&self) -> ErrorCode {
        match self {
            SdkError::Config(_) | SdkError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            SdkError::Store(err) => err.error_code(),
            SdkError::Source(err) => err.error_code(),
            SdkError::Load(err) => err.error_code(),
            SdkError::Analysis(err) => err.error_code(),
        }
    }
}
