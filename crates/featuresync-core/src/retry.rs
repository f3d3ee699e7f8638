//! Retry logic with exponential backoff
//!
//! Every store and service call is wrapped in a bounded retry: there is no
//! infinite retry anywhere in featuresync. Used for:
//! - Feature store writes (full-record replacements, so retries are idempotent)
//! - Optional retrieval retries in the serving client
//!
//! # Example
//!
//! ```rust,ignore
//! use featuresync_core::retry::{RetryPolicy, retry_async_if};
//!
//! let policy = RetryPolicy::default();
//! let outcome = retry_async_if(&policy, |e| e.is_transient(), || async {
//!     store.put_record("CustomerTransactions", &record).await
//! }).await?;
//! ```

use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (total attempts = max_retries + 1)
    pub max_retries: usize,

    /// Initial backoff delay
    pub initial_delay: Duration,

    /// Maximum backoff delay (caps exponential growth)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (1.0 = fixed backoff)
    pub backoff_multiplier: f64,

    /// Add random jitter to prevent thundering herd (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Fixed delay between attempts, no jitter
    pub fn fixed(max_retries: usize, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Calculate backoff delay for a given attempt
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        // Add jitter: random value between (1 - jitter) and (1 + jitter)
        let jitter = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * self.jitter_factor;
        let final_delay = (capped_delay * jitter) as u64;

        Duration::from_millis(final_delay)
    }
}

/// Retry error - wraps the original error with retry metadata
#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: usize,
    pub total_delay: Duration,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Operation failed after {} attempts (total delay: {:?}): {}",
            self.attempts, self.total_delay, self.error
        )
    }
}

impl<E: std::error::Error> std::error::Error for RetryError<E> {}

/// Retry an async operation with exponential backoff, retrying every error
///
/// Returns `Ok(T)` on success, `Err(RetryError<E>)` after exhausting retries.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_async_if(policy, |_| true, operation).await
}

/// Retry an async operation, but only while `should_retry` accepts the error
///
/// A rejected error is returned immediately with the attempts made so far.
pub async fn retry_async_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;
    let mut total_delay = Duration::from_secs(0);

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        "Operation succeeded after {} attempts (total delay: {:?})",
                        attempts, total_delay
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !should_retry(&error) {
                    debug!("Operation failed with non-retryable error: {}", error);
                    return Err(RetryError {
                        error,
                        attempts,
                        total_delay,
                    });
                }

                if attempts > policy.max_retries {
                    warn!(
                        "Operation failed after {} attempts (total delay: {:?}): {}",
                        attempts, total_delay, error
                    );
                    return Err(RetryError {
                        error,
                        attempts,
                        total_delay,
                    });
                }

                let delay = policy.backoff_delay(attempts - 1);
                total_delay += delay;

                debug!(
                    "Operation failed (attempt {}/{}), retrying after {:?}: {}",
                    attempts,
                    policy.max_retries + 1,
                    delay,
                    error
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
