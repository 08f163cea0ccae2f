//! Service trait abstraction for mail queue operations
//!
//! Control interfaces talk to the queue through [`MailQueryService`] rather
//! than the concrete [`MailQueue`], so they can be tested against a fake.

use std::time::Duration;

use crate::{
    processor::MailQueue,
    rate_limiter::RateLimitStats,
    types::{EmailJob, EmailMessage, EmailMessageBuilder, JobId, JobStatus, QueueStats},
};

/// Query and management operations exposed to operators
pub trait MailQueryService: Send + Sync {
    /// Point-in-time container counts
    fn stats(&self) -> QueueStats;

    /// Which container holds the job, or `NotFound`
    fn job_status(&self, id: &JobId) -> JobStatus;

    /// Snapshot of a single job
    fn job(&self, id: &JobId) -> Option<(JobStatus, EmailJob)>;

    /// Snapshot of all jobs, optionally limited to one container
    fn jobs(&self, filter: Option<JobStatus>) -> Vec<(JobStatus, EmailJob)>;

    /// Remove a job still waiting in Pending
    fn cancel_job(&self, id: &JobId) -> bool;

    /// Purge completed jobs older than `older_than`
    fn cleanup(&self, older_than: Duration) -> usize;

    /// Default retention for [`cleanup`](Self::cleanup)
    fn retention(&self) -> Duration;

    /// Builder pre-filled with the default sender
    fn message(&self) -> EmailMessageBuilder;

    /// Queue a message, optionally delayed
    fn submit(&self, message: EmailMessage, delay: Option<Duration>) -> JobId;

    /// Whether real delivery is enabled (as opposed to dry-run)
    fn delivery_enabled(&self) -> bool;

    fn in_flight(&self) -> usize;

    fn rate_limit_stats(&self) -> RateLimitStats;
}

impl MailQueryService for MailQueue {
    fn stats(&self) -> QueueStats {
        Self::stats(self)
    }

    fn job_status(&self, id: &JobId) -> JobStatus {
        Self::job_status(self, id)
    }

    fn job(&self, id: &JobId) -> Option<(JobStatus, EmailJob)> {
        Self::job(self, id)
    }

    fn jobs(&self, filter: Option<JobStatus>) -> Vec<(JobStatus, EmailJob)> {
        Self::jobs(self, filter)
    }

    fn cancel_job(&self, id: &JobId) -> bool {
        Self::cancel_job(self, id)
    }

    fn cleanup(&self, older_than: Duration) -> usize {
        Self::cleanup(self, older_than)
    }

    fn retention(&self) -> Duration {
        self.config().retention()
    }

    fn message(&self) -> EmailMessageBuilder {
        Self::message(self)
    }

    fn submit(&self, message: EmailMessage, delay: Option<Duration>) -> JobId {
        match delay {
            Some(delay) => self.enqueue_delayed(message, delay),
            None => self.enqueue(message),
        }
    }

    fn delivery_enabled(&self) -> bool {
        self.config().enabled
    }

    fn in_flight(&self) -> usize {
        Self::in_flight(self)
    }

    fn rate_limit_stats(&self) -> RateLimitStats {
        Self::rate_limit_stats(self)
    }
}
