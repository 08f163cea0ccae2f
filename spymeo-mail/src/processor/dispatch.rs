//! The single dispatch worker
//!
//! At most one of these tasks exists at a time: [`JobStore::push`] hands out
//! the start permission and [`JobStore::claim_next`] takes it back when Pending
//! runs dry, both under the store lock. No lock is ever held across an await.
//!
//! [`JobStore::push`]: crate::queue::JobStore::push
//! [`JobStore::claim_next`]: crate::queue::JobStore::claim_next

use std::sync::Arc;

use spymeo_common::{internal, outgoing};
use tokio::time::Instant;

use super::Inner;
use crate::{
    queue::{Claim, Failure},
    types::{EmailMessage, JobId},
};

pub(super) async fn run(inner: Arc<Inner>) {
    internal!(level = DEBUG, "Mail dispatch worker started");

    loop {
        // Only wait on the rate windows while there is something to send
        if inner.store.lock().release_if_drained() {
            break;
        }

        throttle(&inner).await;

        let claim = inner.store.lock().claim_next(Instant::now());

        match claim {
            Claim::Job {
                id,
                message,
                attempt,
            } => dispatch(&inner, id, &message, attempt).await,
            Claim::WaitUntil(at) => {
                tokio::select! {
                    () = inner.wake.notified() => {}
                    () = tokio::time::sleep_until(at) => {}
                }
            }
            Claim::Drained => break,
        }
    }

    inner.idle.notify_waiters();
    internal!(level = DEBUG, "Mail dispatch worker idle, exiting");
}

/// Sleep until every rate window has room for one more send.
///
/// After any sleep the windows are checked again from the per-second one.
async fn throttle(inner: &Inner) {
    loop {
        let wait = inner.limiter.lock().check(Instant::now());
        match wait {
            Some(wait) => tokio::time::sleep(wait).await,
            None => return,
        }
    }
}

#[tracing::instrument(level = "debug", skip(inner, message), fields(to = ?message.to))]
async fn dispatch(inner: &Inner, id: JobId, message: &EmailMessage, attempt: u32) {
    if !inner.config.enabled {
        outgoing!(
            level = INFO,
            "[dry-run] Email {id} to {:?}: {}",
            message.to,
            message.subject
        );
        inner.store.lock().complete(&id, None);
        return;
    }

    match inner.mailer.send(message).await {
        Ok(receipt) => {
            let now = Instant::now();
            inner.limiter.lock().record(now);
            outgoing!(
                level = INFO,
                "Email {id} sent on attempt {attempt} (provider id {})",
                receipt.provider_id
            );
            inner.store.lock().complete(&id, Some(receipt.provider_id));
        }
        Err(error) => {
            let outcome = inner.store.lock().fail(
                &id,
                error.to_string(),
                &inner.config.retry,
                Instant::now(),
            );

            match outcome {
                Failure::Retry { attempt, delay } => {
                    tracing::warn!(
                        %id,
                        attempt,
                        retry_in_ms = delay.as_millis(),
                        "Email send failed, will retry: {error}"
                    );
                }
                Failure::Exhausted { attempts } => {
                    tracing::error!(%id, attempts, "Email send failed permanently: {error}");
                }
                Failure::Unknown => {
                    tracing::warn!(%id, "Send failed for a job no longer in processing: {error}");
                }
            }
        }
    }
}
