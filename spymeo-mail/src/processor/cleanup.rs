//! Periodic retention pass and graceful shutdown for the mail queue

use std::time::Duration;

use spymeo_common::{Signal, internal};
use tokio::sync::broadcast;

use super::MailQueue;

/// Upper bound on how long shutdown waits for an in-flight send
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for an in-flight send during shutdown
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

impl MailQueue {
    /// Run cleanup passes every `cleanup_interval_secs` until shutdown.
    ///
    /// On shutdown, waits up to 30 seconds for the send currently handed to
    /// the mailer to finish. Pending jobs are not persisted and are lost.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Mail queue maintenance starting");

        let retention = self.inner.config.retention();
        let mut cleanup_timer = tokio::time::interval(self.inner.config.cleanup_interval());

        // Skip the first tick to avoid immediate execution
        cleanup_timer.tick().await;

        loop {
            tokio::select! {
                _ = cleanup_timer.tick() => {
                    let removed = self.cleanup(retention);
                    tracing::debug!(removed, "Mail queue cleanup pass");
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Mail queue received shutdown signal");
                            self.drain_in_flight(SHUTDOWN_TIMEOUT).await;
                        }
                        Err(e) => {
                            tracing::error!("Mail queue shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        let stats = self.stats();
        if stats.pending > 0 {
            tracing::warn!(
                pending = stats.pending,
                "Exiting with unsent email jobs, they will not be retried"
            );
        }

        internal!(level = INFO, "Mail queue shutdown complete");
    }

    /// Wait until nothing is in flight or `timeout` elapses.
    ///
    /// Returns `true` if the in-flight send finished in time.
    pub async fn drain_in_flight(&self, timeout: Duration) -> bool {
        let start = tokio::time::Instant::now();

        while self.in_flight() > 0 {
            if start.elapsed() >= timeout {
                tracing::warn!(
                    "Shutdown timeout exceeded, {} in-flight email send abandoned",
                    self.in_flight()
                );
                return false;
            }

            tracing::debug!(
                "Waiting for in-flight email send to complete ({:.1}s elapsed)...",
                start.elapsed().as_secs_f64()
            );
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        internal!("No email send in flight");
        true
    }
}
