//! Mail queue handle and dispatch worker orchestration
//!
//! [`MailQueue`] is the only entry point callers use. It is cheap to clone and
//! every clone talks to the same job store, limiter and worker, so one queue is
//! built by the composition root and handed to whoever needs to send mail.

mod cleanup;
mod dispatch;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use spymeo_common::internal;
use tokio::{runtime::Handle, sync::Notify, time::Instant};

use crate::{
    config::MailConfig,
    error::QueueError,
    mailer::Mailer,
    queue::JobStore,
    rate_limiter::{RateLimitStats, RateLimiter},
    types::{EmailJob, EmailMessage, EmailMessageBuilder, JobId, JobStatus, QueueStats},
};

/// Schedule used for delays that overflow `Instant`
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 86_400);

pub(crate) struct Inner {
    config: MailConfig,
    mailer: Arc<dyn Mailer>,
    store: Mutex<JobStore>,
    limiter: Mutex<RateLimiter>,
    /// Signalled on every enqueue while the worker is alive
    wake: Notify,
    /// Signalled whenever the worker drains Pending and exits
    idle: Notify,
    runtime: Handle,
}

/// Handle to the in-process email dispatch queue
#[derive(Clone)]
pub struct MailQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MailQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailQueue")
            .field("enabled", &self.inner.config.enabled)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl MailQueue {
    /// Build a queue around a delivery collaborator.
    ///
    /// Must be called from within a tokio runtime; the worker is spawned onto
    /// that runtime whenever work arrives.
    ///
    /// # Errors
    /// If the configuration is out of range or no runtime is available
    pub fn new(config: MailConfig, mailer: Arc<dyn Mailer>) -> Result<Self, QueueError> {
        config.validate()?;

        let runtime = Handle::try_current().map_err(|e| QueueError::NoRuntime(e.to_string()))?;

        internal!(
            level = INFO,
            "Mail queue ready (delivery {}, {}/s, {}/min, {}/h, {} attempts)",
            if config.enabled { "enabled" } else { "disabled, dry-run" },
            config.rate_limit.max_per_second,
            config.rate_limit.max_per_minute,
            config.rate_limit.max_per_hour,
            config.retry.max_attempts
        );

        let limiter = RateLimiter::new(&config.rate_limit, Instant::now());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                mailer,
                store: Mutex::new(JobStore::default()),
                limiter: Mutex::new(limiter),
                wake: Notify::new(),
                idle: Notify::new(),
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &MailConfig {
        &self.inner.config
    }

    /// A message builder with the configured default sender already filled in
    pub fn message(&self) -> EmailMessageBuilder {
        EmailMessage::builder().from(self.inner.config.default_from.clone())
    }

    /// Queue a message for immediate dispatch.
    ///
    /// Returns as soon as the job is recorded; delivery outcome is only
    /// observable through [`job_status`](Self::job_status) and [`stats`](Self::stats).
    pub fn enqueue(&self, message: EmailMessage) -> JobId {
        self.push(message, None)
    }

    /// Queue a message that must not be dispatched before `delay` has elapsed.
    ///
    /// A delay too large to represent as an instant is clamped to a century.
    pub fn enqueue_delayed(&self, message: EmailMessage, delay: Duration) -> JobId {
        let now = Instant::now();
        let due = now.checked_add(delay).unwrap_or_else(|| now + MAX_DELAY);
        self.push(message, Some(due))
    }

    /// Queue a message for a wall-clock time. Times in the past dispatch at once.
    pub fn enqueue_at(&self, message: EmailMessage, at: DateTime<Utc>) -> JobId {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.enqueue_delayed(message, delay)
    }

    fn push(&self, message: EmailMessage, scheduled_for: Option<Instant>) -> JobId {
        let job = EmailJob::new(
            Arc::new(message),
            self.inner.config.retry.max_attempts,
            scheduled_for,
        );
        let id = job.id;

        let start_worker = self.inner.store.lock().push(job);

        tracing::debug!(%id, delayed = scheduled_for.is_some(), "Email job queued");

        if start_worker {
            self.inner
                .runtime
                .spawn(dispatch::run(Arc::clone(&self.inner)));
        } else {
            self.inner.wake.notify_one();
        }

        id
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.store.lock().stats()
    }

    pub fn job_status(&self, id: &JobId) -> JobStatus {
        self.inner.store.lock().status(id)
    }

    /// Snapshot of one job and the container holding it
    pub fn job(&self, id: &JobId) -> Option<(JobStatus, EmailJob)> {
        self.inner.store.lock().get(id)
    }

    /// Snapshot of every job, or of one container, ordered by id
    pub fn jobs(&self, filter: Option<JobStatus>) -> Vec<(JobStatus, EmailJob)> {
        self.inner.store.lock().list(filter)
    }

    /// Remove a job that has not been claimed by the worker yet.
    ///
    /// Jobs already handed to the mailer cannot be recalled; for those, and for
    /// finished or unknown ids, this returns `false`.
    pub fn cancel_job(&self, id: &JobId) -> bool {
        let cancelled = self.inner.store.lock().cancel(id);
        if cancelled {
            internal!(level = INFO, "Cancelled email job {id}");
            // Let a worker waiting on this job's schedule re-scan and exit
            self.inner.wake.notify_one();
        }
        cancelled
    }

    /// Purge completed jobs enqueued more than `older_than` ago.
    ///
    /// Failed jobs are kept. Returns the number of records removed.
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let removed = self
            .inner
            .store
            .lock()
            .purge_completed(Instant::now(), older_than);

        if removed > 0 {
            internal!(level = DEBUG, "Purged {removed} completed email jobs");
        }

        removed
    }

    /// Number of jobs currently handed to the mailer (0 or 1)
    pub fn in_flight(&self) -> usize {
        self.inner.store.lock().in_flight()
    }

    pub fn is_running(&self) -> bool {
        self.inner.store.lock().is_running()
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.inner.limiter.lock().stats()
    }

    /// Resolve once Pending and Processing are both empty.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.store.lock().is_idle() {
                return;
            }

            notified.await;
        }
    }
}
