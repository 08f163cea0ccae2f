//! Retry policy for failed sends.
//!
//! Keeps the retry ceiling and the backoff curve together so the worker only
//! asks two questions: "may this job be retried?" and "how long until then?".

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Retry configuration for queued jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of dispatch attempts before a job is marked failed.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on every further failure.
    ///
    /// Default: 1000 ms
    #[serde(default = "defaults::base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Ceiling for the exponential part of the delay.
    ///
    /// Default: 10000 ms
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Upper bound (exclusive) of the random delay added on top.
    ///
    /// Default: 1000 ms
    #[serde(default = "defaults::jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_backoff_ms: defaults::base_backoff_ms(),
            max_backoff_ms: defaults::max_backoff_ms(),
            jitter_ms: defaults::jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Whether a job that has made `attempts` failed attempts goes back to pending.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Remaining attempts, saturating at zero.
    #[must_use]
    pub const fn remaining_attempts(&self, attempts: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts)
    }

    /// Deterministic part of the delay after attempt number `attempt` (1-indexed)
    /// failed: `min(base * 2^(attempt - 1), max)`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = if exponent >= 63 {
            self.max_backoff_ms
        } else {
            self.base_backoff_ms
                .saturating_mul(1u64 << exponent)
                .min(self.max_backoff_ms)
        };

        Duration::from_millis(delay)
    }

    /// Delay before retrying a job whose attempt number `attempt` just failed.
    ///
    /// Each call draws fresh jitter in `[0, jitter_ms)` from the thread-local
    /// generator, so jobs failing together spread out instead of retrying in
    /// lockstep.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..self.jitter_ms)
        };

        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    /// # Errors
    /// If `max_attempts` is zero or the backoff bounds are inverted
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_attempts == 0 {
            return Err(QueueError::invalid(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }

        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(QueueError::invalid(
                "retry.base_backoff_ms",
                format!(
                    "{} exceeds max_backoff_ms ({})",
                    self.base_backoff_ms, self.max_backoff_ms
                ),
            ));
        }

        Ok(())
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_backoff_ms() -> u64 {
        1_000
    }

    pub const fn max_backoff_ms() -> u64 {
        10_000
    }

    pub const fn jitter_ms() -> u64 {
        1_000
    }
}
