//! Job store: the four containers a job moves through
//!
//! ```text
//! enqueue ─▶ Pending ─claim─▶ Processing ─ok─▶ Completed
//!               ▲                 │
//!               └──retry (backoff)┤
//!                                 └─attempts exhausted─▶ Failed
//! ```
//!
//! A job lives in exactly one container at a time; every transition below
//! happens under the caller's single lock, so no observer ever sees a job in
//! two places or in none (except after a successful cancel).

mod cleanup;

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use tokio::time::Instant;

use crate::{
    policy::RetryPolicy,
    types::{EmailJob, EmailMessage, JobId, JobStatus, QueueStats},
};

/// Re-scan interval used when nothing in Pending carries a schedule to wait for
pub(crate) const IDLE_POLL: Duration = Duration::from_millis(100);

/// Outcome of asking the store for the next job to dispatch
#[derive(Debug)]
pub(crate) enum Claim {
    /// The job was moved to Processing and its attempt counter bumped
    Job {
        id: JobId,
        message: Arc<EmailMessage>,
        attempt: u32,
    },
    /// Nothing is due yet; the earliest scheduled job becomes due at this instant
    WaitUntil(Instant),
    /// Pending is empty; the worker guard has been cleared
    Drained,
}

/// What happened to a job after a failed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    /// Back in Pending, due after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Moved to Failed for good
    Exhausted { attempts: u32 },
    /// The id was not in Processing
    Unknown,
}

#[derive(Debug, Default)]
pub(crate) struct JobStore {
    pending: Vec<EmailJob>,
    processing: AHashMap<JobId, EmailJob>,
    completed: AHashMap<JobId, EmailJob>,
    failed: AHashMap<JobId, EmailJob>,
    /// Whether a worker task is currently draining Pending
    running: bool,
    total_sent: u64,
}

impl JobStore {
    /// Append a job to Pending.
    ///
    /// Returns `true` when no worker is running, in which case the guard is now
    /// set and the caller must start one.
    pub fn push(&mut self, job: EmailJob) -> bool {
        self.pending.push(job);

        if self.running {
            false
        } else {
            self.running = true;
            true
        }
    }

    /// Clear the worker guard if Pending is empty.
    ///
    /// Returns `true` when the guard was cleared and the worker must exit.
    pub fn release_if_drained(&mut self) -> bool {
        if self.pending.is_empty() {
            self.running = false;
            true
        } else {
            false
        }
    }

    /// Move the first due job from Pending to Processing.
    ///
    /// Pending is scanned in insertion order, so a fresh job can overtake an
    /// older one that is waiting on its backoff; there is no FIFO guarantee.
    pub fn claim_next(&mut self, now: Instant) -> Claim {
        if self.release_if_drained() {
            return Claim::Drained;
        }

        let due = self
            .pending
            .iter()
            .position(|job| job.is_due(now) && !self.processing.contains_key(&job.id));

        let Some(index) = due else {
            let wake_at = self
                .pending
                .iter()
                .filter_map(|job| job.scheduled_for)
                .filter(|at| *at > now)
                .min()
                .unwrap_or(now + IDLE_POLL);
            return Claim::WaitUntil(wake_at);
        };

        let mut job = self.pending.remove(index);
        job.attempts += 1;

        let claim = Claim::Job {
            id: job.id,
            message: Arc::clone(&job.message),
            attempt: job.attempts,
        };
        self.processing.insert(job.id, job);
        claim
    }

    /// Move a job from Processing to Completed.
    ///
    /// `provider_id` is `None` for dry-run completions, which are not counted
    /// in `total_sent`.
    pub fn complete(&mut self, id: &JobId, provider_id: Option<String>) -> bool {
        let Some(mut job) = self.processing.remove(id) else {
            return false;
        };

        if provider_id.is_some() {
            self.total_sent += 1;
        }

        job.provider_id = provider_id;
        job.scheduled_for = None;
        self.completed.insert(job.id, job);
        true
    }

    /// Record a failed attempt and route the job to Pending or Failed.
    pub fn fail(
        &mut self,
        id: &JobId,
        error: String,
        policy: &RetryPolicy,
        now: Instant,
    ) -> Failure {
        let Some(mut job) = self.processing.remove(id) else {
            return Failure::Unknown;
        };

        job.last_error = Some(error);

        if job.attempts < job.max_attempts {
            let delay = policy.backoff(job.attempts);
            let attempt = job.attempts;
            job.scheduled_for = Some(now + delay);
            self.pending.push(job);
            Failure::Retry { attempt, delay }
        } else {
            let attempts = job.attempts;
            self.failed.insert(job.id, job);
            Failure::Exhausted { attempts }
        }
    }

    /// Remove a job that has not been claimed yet.
    pub fn cancel(&mut self, id: &JobId) -> bool {
        self.pending
            .iter()
            .position(|job| job.id == *id)
            .map(|index| self.pending.remove(index))
            .is_some()
    }

    pub fn status(&self, id: &JobId) -> JobStatus {
        if self.pending.iter().any(|job| job.id == *id) {
            JobStatus::Pending
        } else if self.processing.contains_key(id) {
            JobStatus::Processing
        } else if self.completed.contains_key(id) {
            JobStatus::Completed
        } else if self.failed.contains_key(id) {
            JobStatus::Failed
        } else {
            JobStatus::NotFound
        }
    }

    pub fn get(&self, id: &JobId) -> Option<(JobStatus, EmailJob)> {
        self.pending
            .iter()
            .find(|job| job.id == *id)
            .map(|job| (JobStatus::Pending, job))
            .or_else(|| {
                self.processing
                    .get(id)
                    .map(|job| (JobStatus::Processing, job))
            })
            .or_else(|| self.completed.get(id).map(|job| (JobStatus::Completed, job)))
            .or_else(|| self.failed.get(id).map(|job| (JobStatus::Failed, job)))
            .map(|(status, job)| (status, job.clone()))
    }

    /// All jobs, optionally restricted to one container, oldest first
    pub fn list(&self, filter: Option<JobStatus>) -> Vec<(JobStatus, EmailJob)> {
        let containers: [(JobStatus, Box<dyn Iterator<Item = &EmailJob> + '_>); 4] = [
            (JobStatus::Pending, Box::new(self.pending.iter())),
            (JobStatus::Processing, Box::new(self.processing.values())),
            (JobStatus::Completed, Box::new(self.completed.values())),
            (JobStatus::Failed, Box::new(self.failed.values())),
        ];

        let mut jobs: Vec<(JobStatus, EmailJob)> = containers
            .into_iter()
            .filter(|(status, _)| filter.is_none_or(|wanted| wanted == *status))
            .flat_map(|(status, jobs)| jobs.map(move |job| (status, job.clone())))
            .collect();

        jobs.sort_by_key(|(_, job)| job.id);
        jobs
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len(),
            processing: self.processing.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
            total_sent: self.total_sent,
        }
    }

    /// Nothing waiting and nothing in flight
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.processing.is_empty()
    }

    pub const fn is_running(&self) -> bool {
        self.running
    }

    pub fn in_flight(&self) -> usize {
        self.processing.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn job(max_attempts: u32) -> EmailJob {
        let message = EmailMessage::builder()
            .to("praticien@example.com")
            .from("noreply@spymeo.fr")
            .subject("Nouvelle réservation")
            .html("<p>Vous avez une nouvelle réservation</p>")
            .build()
            .unwrap();
        EmailJob::new(Arc::new(message), max_attempts, None)
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_ms: 0,
            ..RetryPolicy::default()
        }
    }

    fn claim_id(claim: Claim) -> JobId {
        match claim {
            Claim::Job { id, .. } => id,
            other => panic!("expected a job, got {other:?}"),
        }
    }

    #[test]
    fn push_starts_worker_once() {
        let mut store = JobStore::default();

        assert!(store.push(job(3)));
        assert!(!store.push(job(3)));
        assert!(store.is_running());
        assert_eq!(store.stats().pending, 2);
    }

    #[test]
    fn claim_moves_job_to_processing() {
        let mut store = JobStore::default();
        let queued = job(3);
        let id = queued.id;
        store.push(queued);

        match store.claim_next(Instant::now()) {
            Claim::Job {
                id: claimed,
                attempt,
                ..
            } => {
                assert_eq!(claimed, id);
                assert_eq!(attempt, 1);
            }
            other => panic!("expected a job, got {other:?}"),
        }

        assert_eq!(store.status(&id), JobStatus::Processing);
        assert_eq!(store.stats().pending, 0);
        assert_eq!(store.in_flight(), 1);
    }

    #[test]
    fn drained_clears_running_guard() {
        let mut store = JobStore::default();
        store.push(job(3));
        let id = claim_id(store.claim_next(Instant::now()));
        store.complete(&id, Some("re_123".to_string()));

        assert!(matches!(store.claim_next(Instant::now()), Claim::Drained));
        assert!(!store.is_running());
        assert!(store.push(job(3)));
    }

    #[test]
    fn release_only_happens_once_pending_is_empty() {
        let mut store = JobStore::default();
        store.push(job(3));

        assert!(!store.release_if_drained());
        assert!(store.is_running());

        let id = claim_id(store.claim_next(Instant::now()));
        assert!(store.release_if_drained());
        assert!(!store.is_running());
        assert_eq!(store.status(&id), JobStatus::Processing);
    }

    #[test]
    fn scheduled_jobs_are_skipped_until_due() {
        let mut store = JobStore::default();
        let now = Instant::now();

        let mut later = job(3);
        later.scheduled_for = Some(now + Duration::from_secs(5));
        let later_id = later.id;
        store.push(later);

        let immediate = job(3);
        let immediate_id = immediate.id;
        store.push(immediate);

        assert_eq!(claim_id(store.claim_next(now)), immediate_id);

        match store.claim_next(now) {
            Claim::WaitUntil(at) => assert_eq!(at, now + Duration::from_secs(5)),
            other => panic!("expected to wait, got {other:?}"),
        }

        assert_eq!(
            claim_id(store.claim_next(now + Duration::from_secs(5))),
            later_id
        );
    }

    #[test]
    fn failure_with_attempts_left_goes_back_to_pending() {
        let mut store = JobStore::default();
        let now = Instant::now();
        store.push(job(3));
        let id = claim_id(store.claim_next(now));

        let outcome = store.fail(&id, "boom".to_string(), &no_jitter(), now);
        assert_eq!(
            outcome,
            Failure::Retry {
                attempt: 1,
                delay: Duration::from_secs(1),
            }
        );

        let (status, job) = store.get(&id).unwrap();
        assert_eq!(status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert_eq!(job.scheduled_for, Some(now + Duration::from_secs(1)));
        assert_eq!(store.in_flight(), 0);
    }

    #[test]
    fn exhausted_job_moves_to_failed_once() {
        let mut store = JobStore::default();
        let mut now = Instant::now();
        store.push(job(2));

        let id = claim_id(store.claim_next(now));
        store.fail(&id, "first".to_string(), &no_jitter(), now);

        now += Duration::from_secs(1);
        let id = claim_id(store.claim_next(now));
        assert_eq!(
            store.fail(&id, "second".to_string(), &no_jitter(), now),
            Failure::Exhausted { attempts: 2 }
        );

        assert_eq!(store.status(&id), JobStatus::Failed);
        assert!(matches!(store.claim_next(now), Claim::Drained));
        assert_eq!(
            store.fail(&id, "third".to_string(), &no_jitter(), now),
            Failure::Unknown
        );

        let stats = store.stats();
        assert_eq!((stats.pending, stats.failed, stats.total_sent), (0, 1, 0));
    }

    #[test]
    fn cancel_only_applies_to_pending() {
        let mut store = JobStore::default();
        let first = job(3);
        let first_id = first.id;
        let second = job(3);
        let second_id = second.id;
        store.push(first);
        store.push(second);

        let claimed = claim_id(store.claim_next(Instant::now()));
        assert_eq!(claimed, first_id);

        assert!(!store.cancel(&first_id));
        assert!(store.cancel(&second_id));
        assert!(!store.cancel(&second_id));
        assert!(!store.cancel(&JobId::generate()));
        assert_eq!(store.status(&second_id), JobStatus::NotFound);

        store.complete(&first_id, None);
        assert!(!store.cancel(&first_id));
    }

    #[test]
    fn dry_run_completion_is_not_counted_as_sent() {
        let mut store = JobStore::default();
        store.push(job(3));
        store.push(job(3));

        let a = claim_id(store.claim_next(Instant::now()));
        store.complete(&a, None);
        let b = claim_id(store.claim_next(Instant::now()));
        store.complete(&b, Some("re_456".to_string()));

        let stats = store.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.total_sent, 1);
        assert_eq!(
            store.get(&b).unwrap().1.provider_id.as_deref(),
            Some("re_456")
        );
    }

    #[test]
    fn list_filters_by_container() {
        let mut store = JobStore::default();
        for _ in 0..3 {
            store.push(job(3));
        }
        let id = claim_id(store.claim_next(Instant::now()));
        store.complete(&id, None);

        assert_eq!(store.list(None).len(), 3);
        assert_eq!(store.list(Some(JobStatus::Pending)).len(), 2);

        let completed = store.list(Some(JobStatus::Completed));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].1.id, id);
        assert!(store.list(Some(JobStatus::Failed)).is_empty());
    }

    #[test]
    fn every_job_is_in_exactly_one_container() {
        let mut store = JobStore::default();
        let now = Instant::now();
        let ids: Vec<JobId> = (0..4)
            .map(|_| {
                let queued = job(1);
                let id = queued.id;
                store.push(queued);
                id
            })
            .collect();

        let a = claim_id(store.claim_next(now));
        store.complete(&a, Some("re_a".to_string()));
        let b = claim_id(store.claim_next(now));
        store.fail(&b, "boom".to_string(), &no_jitter(), now);
        let _in_flight = claim_id(store.claim_next(now));

        let stats = store.stats();
        assert_eq!(
            stats.pending + stats.processing + stats.completed + stats.failed,
            ids.len()
        );
        for id in &ids {
            assert_ne!(store.status(id), JobStatus::NotFound);
        }
    }
}
