//! Mail queue configuration
//!
//! All values are process-wide and read when the queue is built; nothing here
//! can be overridden per job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::QueueError, mailer::HttpMailerConfig, policy::RetryPolicy,
    rate_limiter::RateLimitConfig,
};

const fn default_retention_ms() -> u64 {
    3_600_000 // 1 hour
}

const fn default_cleanup_interval() -> u64 {
    300
}

fn default_from() -> String {
    "SPYMEO <noreply@spymeo.fr>".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MailConfig {
    /// When `false` the queue runs in dry-run mode: every job is logged and
    /// marked completed without the delivery collaborator being called.
    ///
    /// Default: `false`
    #[serde(default)]
    pub enabled: bool,

    /// Sender used by [`MailQueue::message`](crate::MailQueue::message)
    #[serde(default = "default_from")]
    pub default_from: String,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Age after which completed jobs are purged by a cleanup pass
    ///
    /// Default: 3600000 ms (1 hour)
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,

    /// How often the service runs a cleanup pass (in seconds)
    ///
    /// Default: 300 seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Transactional email provider used when `enabled` is set
    #[serde(default)]
    pub provider: HttpMailerConfig,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_from: default_from(),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            retention_ms: default_retention_ms(),
            cleanup_interval_secs: default_cleanup_interval(),
            provider: HttpMailerConfig::default(),
        }
    }
}

impl MailConfig {
    pub const fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// # Errors
    /// If any nested section is out of range or the cleanup interval is zero
    pub fn validate(&self) -> Result<(), QueueError> {
        self.retry.validate()?;
        self.rate_limit.validate()?;

        if self.cleanup_interval_secs == 0 {
            return Err(QueueError::invalid(
                "cleanup_interval_secs",
                "must be at least 1",
            ));
        }

        if self.default_from.trim().is_empty() {
            return Err(QueueError::invalid("default_from", "must not be empty"));
        }

        Ok(())
    }
}
