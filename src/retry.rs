//! Retry combinator shared by the traversal controller and download pipeline.
//!
//! A [`RetryPolicy`] decides how many attempts an operation gets and how long
//! to wait between them. [`retry`] applies a policy to any fallible async
//! operation, retrying only errors accepted by a caller-provided predicate.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::retry::{RetryPolicy, retry};
//!
//! # async fn example() {
//! let policy = RetryPolicy::fixed(3, Duration::ZERO);
//! let result: Result<u32, String> = retry(
//!     &policy,
//!     "example",
//!     |error: &String| error.contains("transient"),
//!     |attempt| async move {
//!         if attempt < 2 { Err("transient".to_string()) } else { Ok(attempt) }
//!     },
//! )
//! .await;
//! assert_eq!(result, Ok(2));
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Decision on whether to retry a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (first retry is attempt 2).
        attempt: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Attempt budget with a constant pause between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Pause before each retry.
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy that waits the same `delay` between attempts.
    ///
    /// `max_attempts` is raised to 1 when 0 is given.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Determines whether the attempt that just failed (1-indexed) may be retried.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.delay,
            attempt: attempt + 1,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempt budget is exhausted.
///
/// `operation` receives the 1-indexed attempt number. The last error is
/// returned when retries stop.
///
/// # Errors
///
/// Returns the operation's error when `is_retryable` rejects it or when no
/// attempts remain.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    let mut attempt = 1u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error) {
                    debug!(operation = operation_name, attempt, %error, "error is not retryable");
                    return Err(error);
                }
                match policy.should_retry(attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        warn!(
                            operation = operation_name,
                            attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            %error,
                            "operation failed, retrying"
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        attempt = next_attempt;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(operation = operation_name, %reason, %error, "giving up");
                        return Err(error);
                    }
                }
            }
        }
    }
}
