use crate::error::SourceError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vulngraph_core::config::SourceConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Draw each delay uniformly from `[d/2, d]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
    }
}

/// Per-source request discipline: requests are serialized, spaced by at least
/// `min_interval`, and retried with exponential backoff on transient failures.
/// One instance belongs to exactly one source.
pub struct RequestPolicy {
    source: String,
    min_interval: Duration,
    retry: RetryPolicy,
    request_timeout: Duration,
    overall_timeout: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPolicy {
    pub fn new(
        source: impl Into<String>,
        min_interval: Duration,
        retry: RetryPolicy,
        request_timeout: Duration,
        overall_timeout: Duration,
    ) -> Self {
        Self {
            source: source.into(),
            min_interval,
            retry,
            request_timeout,
            overall_timeout,
            last_request: Mutex::new(None),
        }
    }

    pub fn from_config(source: &str, config: &SourceConfig) -> Self {
        let min_interval = config.min_interval();
        let retry = RetryPolicy {
            max_retries: config.max_retries,
            base_backoff: min_interval.max(Duration::from_secs(1)),
            ..RetryPolicy::default()
        };
        Self::new(
            source,
            min_interval,
            retry,
            config.request_timeout(),
            config.overall_timeout(),
        )
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    /// Bound a whole window fetch, every page and retry included, by
    /// `overall_timeout`. Per-request deadlines inside `fetch` never extend it.
    pub async fn bounded<T, Fut>(&self, fetch: Fut) -> Result<T, SourceError>
    where
        Fut: Future<Output = Result<T, SourceError>>,
    {
        match tokio::time::timeout(self.overall_timeout, fetch).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(
                    source = %self.source,
                    timeout_ms = u64::try_from(self.overall_timeout.as_millis()).unwrap_or(u64::MAX),
                    "window fetch exceeded overall timeout"
                );
                Err(SourceError::TimedOut(self.overall_timeout))
            }
        }
    }

    /// Run `op` under this policy. Non-retryable errors return immediately;
    /// retryable ones are retried up to `max_retries` times, then surface as
    /// [`SourceError::SourceExhausted`].
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let deadline = Instant::now() + self.overall_timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.attempt(cancel, deadline, &mut op).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt > self.retry.max_retries {
                warn!(
                    source = %self.source,
                    attempts = attempt,
                    error = %err,
                    "giving up after retries"
                );
                return Err(SourceError::SourceExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let mut delay = self.retry.backoff(attempt);
            if let SourceError::RateLimited {
                retry_after: Some(retry_after),
            } = &err
            {
                delay = delay.max(*retry_after);
            }
            if Instant::now() + delay > deadline {
                return Err(SourceError::TimedOut(self.overall_timeout));
            }

            warn!(
                source = %self.source,
                attempt = attempt,
                backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "retrying request"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One paced request. The slot lock is held for the whole request so that
    /// two requests to the same source never overlap.
    async fn attempt<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        op: &mut F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut last_request = self.last_request.lock().await;
        if let Some(previous) = *last_request {
            let ready = previous + self.min_interval;
            if ready > Instant::now() {
                if ready > deadline {
                    return Err(SourceError::TimedOut(self.overall_timeout));
                }
                debug!(source = %self.source, "waiting for request slot");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                    _ = tokio::time::sleep_until(ready) => {}
                }
            }
        }
        *last_request = Some(Instant::now());

        let budget = self
            .request_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        tokio::select! {
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            result = tokio::time::timeout(budget, op()) => match result {
                Ok(result) => result,
                Err(_elapsed) => Err(SourceError::SourceUnavailable(format!(
                    "request timed out after {budget:?}"
                ))),
            },
        }
    }
}
