use crate::error::SourceError;
use crate::window::DateWindow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use vulngraph_core::record::NormalizedRecord;

/// One advisory feed. Paging cursors stay inside the implementation; callers
/// only ever see whole windows.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable lowercase source name (`nvd`, `github`, ...).
    fn source(&self) -> &str;

    /// Fetch every record whose source timestamp falls in `window`.
    /// Partial results are discarded on error or cancellation.
    async fn fetch_window(
        &self,
        window: DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError>;

    /// Validating entry point over raw bounds.
    async fn fetch(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<NormalizedRecord>, SourceError> {
        let window = DateWindow::new(start, end)?;
        self.fetch_window(window, cancel).await
    }
}
