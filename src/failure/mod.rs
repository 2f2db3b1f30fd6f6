//! Consecutive-failure tracking for one traversal run.
//!
//! Verification and extraction signals share a single counter: any success
//! resets it, and traversal halts once it reaches the threshold.

use tracing::debug;

/// Default number of consecutive failures that stops a traversal.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Consecutive-failure counter with reset-on-success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureTracker {
    consecutive_failures: u32,
    threshold: u32,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl FailureTracker {
    /// Creates a tracker; a threshold of 0 is raised to 1.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            threshold: threshold.max(1),
        }
    }

    /// Counts one failure signal and returns the new consecutive count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        debug!(
            consecutive = self.consecutive_failures,
            threshold = self.threshold,
            "failure recorded"
        );
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                cleared = self.consecutive_failures,
                "failure streak reset"
            );
        }
        self.consecutive_failures = 0;
    }

    /// Returns `true` once the consecutive count has reached the threshold.
    #[must_use]
    pub fn exceeded(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
