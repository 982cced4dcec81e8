//! Exponential-backoff retry wrapper.
//!
//! Wraps any fallible async operation, retrying only transport failures
//! (§4.9). Authentication failures, cancellation, and malformed responses
//! are never retried.

use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Configuration for [`with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            backoff_factor: 2,
        }
    }
}

impl RetryConfig {
    /// Delay before the `n`th retry attempt (0-indexed), in milliseconds.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(self.backoff_factor.saturating_pow(attempt))
    }
}

/// Executes `operation` with exponential-backoff retry for transport
/// failures only. Any other [`CoreError`] kind is returned immediately.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    config: RetryConfig,
    mut operation: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    let mut last_error: Option<CoreError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay_ms = config.delay_ms(attempt - 1);
            tracing::info!(
                label,
                attempt,
                max_retries = config.max_retries,
                delay_ms,
                "retrying after transport failure"
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind().is_retriable() => {
                tracing::warn!(label, %err, "transport error");
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error.expect("retry loop always records an error before exhausting attempts"))
}
