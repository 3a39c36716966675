//! Duplicate-key retry configuration and pacing.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::contracts::StoreError;

/// Configuration for retrying lost upsert races.
///
/// The default retries without bound and only yields to the scheduler between
/// attempts; a non-zero `initial_delay_ms` adds jittered exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries. `None` retries until the race resolves.
    pub max_retries: Option<usize>,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay_ms: 0,
            max_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Creates a RetryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `AUTOSEQ_RETRY_MAX`: Maximum retry attempts (default: unbounded)
    /// - `AUTOSEQ_RETRY_INITIAL_MS`: Initial backoff delay in ms (default: 0)
    /// - `AUTOSEQ_RETRY_MAX_MS`: Maximum backoff delay in ms (default: 100)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_retries: std::env::var("AUTOSEQ_RETRY_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(default.max_retries),
            initial_delay_ms: std::env::var("AUTOSEQ_RETRY_INITIAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.initial_delay_ms),
            max_delay_ms: std::env::var("AUTOSEQ_RETRY_MAX_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_delay_ms),
        }
    }

    /// A bounded policy that gives up after `max_retries`.
    pub fn bounded(max_retries: usize) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Self::default()
        }
    }

    /// Creates an exponential backoff builder with jitter.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries.unwrap_or(usize::MAX))
            .with_jitter()
    }
}

/// Only the lost upsert race is retried; every other error is final.
#[inline]
pub fn is_retryable_store_error(err: &StoreError) -> bool {
    err.is_duplicate_key()
}

/// Sleeper for [`backon::Retryable`]: always hands control back to the
/// scheduler, then waits out any non-zero backoff delay.
pub async fn yield_then_sleep(delay: Duration) {
    tokio::task::yield_now().await;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
