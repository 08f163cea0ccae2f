//! Retention pass over finished jobs
//!
//! Only Completed records are purged. Failed records are kept for the life of
//! the process so operators can still inspect why a message never went out.

use std::time::Duration;

use tokio::time::Instant;

use super::JobStore;

impl JobStore {
    /// Drop completed jobs enqueued more than `older_than` before `now`.
    ///
    /// Returns the number of records removed.
    pub fn purge_completed(&mut self, now: Instant, older_than: Duration) -> usize {
        let before = self.completed.len();
        self.completed
            .retain(|_, job| now.saturating_duration_since(job.enqueued_at) < older_than);
        before - self.completed.len()
    }
}
