//! Retry utilities with exponential backoff.
//!
//! Role and user attribute writes are compare-and-swap: a writer that read a
//! stale version gets `VersionConflict` and has to read again. This module
//! re-runs such read-modify-write sequences.
//!
//! # Example
//!
//! ```rust,no_run
//! use gatehouse_engine::retry::{retry_on_conflict, RetryConfig};
//! use gatehouse_model::AuthzResult;
//!
//! async fn example() -> AuthzResult<u64> {
//!     retry_on_conflict(&RetryConfig::default(), "role auditor", || async {
//!         // read, modify, write with the version that was read
//!         Ok(1)
//!     })
//!     .await
//! }
//! ```

use gatehouse_model::{AuthzError, AuthzResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Base for exponential backoff (typically 2.0)
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            exponential_base: 1.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.exponential_base).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Execute a function with retries and a custom predicate for retryable errors.
///
/// Errors rejected by `is_retryable` are returned immediately. Otherwise the
/// call is repeated with exponential backoff until it succeeds or
/// `max_attempts` is reached.
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut f: F,
    mut is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
    P: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => {
                tracing::debug!(error = ?e, "Error is not retryable, returning immediately");
                return Err(e);
            }
            Err(e) if attempt >= config.max_attempts => {
                tracing::error!(attempts = attempt, error = ?e, "All retry attempts exhausted");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = ?e,
                    "Attempt failed, retrying"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

/// Re-run a read-modify-write sequence while it loses version races.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    entity: &str,
    f: F,
) -> AuthzResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AuthzResult<T>>,
{
    let result = with_retry_if(config, f, AuthzError::is_retryable).await;
    if let Err(AuthzError::VersionConflict { .. }) = result {
        tracing::error!(entity = %entity, "Gave up after repeated version conflicts");
    }
    result
}
