//! Global send-rate limiting using fixed windows
//!
//! Three independent windows (one second, one minute, one hour) each carry a
//! counter and the instant the window opened. Before a dispatch every window
//! is checked in that order:
//!
//! - a window older than its duration is reset (count = 0, opened = now)
//! - a window at its cap yields the time remaining until it reopens
//!
//! The worker sleeps for the returned duration and checks again from the
//! per-second window, so a sleep for one window never lets another slip by.
//!
//! This is a fixed-window scheme, not a sliding one: a burst straddling a
//! window boundary can briefly send up to twice a cap within one duration.
//!
//! ```text
//! cap 100/s, 150 jobs ready at t=0
//! - sends 1..=100 go out at t=0
//! - send 101 waits for the window opened at t=0 to expire (t=1s)
//! - sends 101..=150 go out at t=1s
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::QueueError;

/// Configuration for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum successful sends per second
    #[serde(default = "default_max_per_second")]
    pub max_per_second: u32,

    /// Maximum successful sends per minute
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,

    /// Maximum successful sends per hour
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_second: default_max_per_second(),
            max_per_minute: default_max_per_minute(),
            max_per_hour: default_max_per_hour(),
        }
    }
}

impl RateLimitConfig {
    /// # Errors
    /// If any cap is zero, which would stall the queue forever
    pub fn validate(&self) -> Result<(), QueueError> {
        for (field, cap) in [
            ("rate_limit.max_per_second", self.max_per_second),
            ("rate_limit.max_per_minute", self.max_per_minute),
            ("rate_limit.max_per_hour", self.max_per_hour),
        ] {
            if cap == 0 {
                return Err(QueueError::invalid(field, "must be at least 1"));
            }
        }

        Ok(())
    }
}

const fn default_max_per_second() -> u32 {
    100
}

const fn default_max_per_minute() -> u32 {
    1_000
}

const fn default_max_per_hour() -> u32 {
    10_000
}

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);

/// A single fixed window
#[derive(Debug, Clone)]
struct Window {
    name: &'static str,
    duration: Duration,
    cap: u32,
    count: u32,
    opened: Instant,
}

impl Window {
    const fn new(name: &'static str, duration: Duration, cap: u32, opened: Instant) -> Self {
        Self {
            name,
            duration,
            cap,
            count: 0,
            opened,
        }
    }

    fn refresh(&mut self, now: Instant) {
        if now.saturating_duration_since(self.opened) >= self.duration {
            self.count = 0;
            self.opened = now;
        }
    }

    /// Time until this window reopens, if it is full
    fn wait_time(&self, now: Instant) -> Option<Duration> {
        if self.count < self.cap {
            return None;
        }

        let wait = self
            .duration
            .saturating_sub(now.saturating_duration_since(self.opened));
        (!wait.is_zero()).then_some(wait)
    }
}

/// Send-rate limiter shared by every job in the queue
#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: [Window; 3],
}

impl RateLimiter {
    /// Create a limiter whose windows all open at `now`
    #[must_use]
    pub const fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            windows: [
                Window::new("second", SECOND, config.max_per_second, now),
                Window::new("minute", MINUTE, config.max_per_minute, now),
                Window::new("hour", HOUR, config.max_per_hour, now),
            ],
        }
    }

    /// Check whether a send may happen at `now`
    ///
    /// Returns `None` if allowed, or the time to wait for the first full window
    /// (checked second, minute, hour) to reopen.
    pub fn check(&mut self, now: Instant) -> Option<Duration> {
        self.windows.iter_mut().find_map(|window| {
            window.refresh(now);
            let wait = window.wait_time(now)?;
            tracing::debug!(
                window = window.name,
                cap = window.cap,
                wait_ms = wait.as_millis(),
                "Rate limit reached, must wait"
            );
            Some(wait)
        })
    }

    /// Count a successful send against every window
    pub fn record(&mut self, now: Instant) {
        for window in &mut self.windows {
            window.refresh(now);
            window.count = window.count.saturating_add(1);
        }
    }

    /// Current counters, for monitoring
    #[must_use]
    pub fn stats(&self) -> RateLimitStats {
        let [second, minute, hour] = &self.windows;
        RateLimitStats {
            sent_this_second: second.count,
            sent_this_minute: minute.count,
            sent_this_hour: hour.count,
        }
    }
}

/// Snapshot of the limiter's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub sent_this_second: u32,
    pub sent_this_minute: u32,
    pub sent_this_hour: u32,
}
