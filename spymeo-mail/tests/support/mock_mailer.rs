//! Scripted [`Mailer`] for queue tests
//!
//! Records every call with the (tokio) instant it happened so tests running on
//! a paused clock can assert on rate limiting and scheduling.
//!
//! ```rust,ignore
//! let mailer = MockMailer::failing_times(1);
//! let queue = MailQueue::new(config, mailer.clone())?;
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use spymeo_mail::{EmailMessage, MailError, Mailer, SendReceipt};
use tokio::{sync::Semaphore, time::Instant};

/// How the mock answers each call
#[derive(Debug, Clone)]
pub enum Script {
    /// Every call succeeds
    Succeed,
    /// Every call fails with this message
    Fail(String),
    /// The first `n` calls fail, later ones succeed
    FailTimes(usize),
}

#[derive(Debug)]
pub struct MockMailer {
    script: Script,
    calls: AtomicUsize,
    sent_at: Mutex<Vec<Instant>>,
    recipients: Mutex<Vec<Vec<String>>>,
    /// When set, every call waits for a permit before answering
    gate: Option<Semaphore>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl MockMailer {
    fn with(script: Script, gate: Option<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            sent_at: Mutex::new(Vec::new()),
            recipients: Mutex::new(Vec::new()),
            gate,
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::with(Script::Succeed, None)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::with(Script::Fail(message.to_string()), None)
    }

    pub fn failing_times(n: usize) -> Arc<Self> {
        Self::with(Script::FailTimes(n), None)
    }

    /// Succeeds, but only once [`release`](Self::release) hands out a permit
    pub fn held() -> Arc<Self> {
        Self::with(Script::Succeed, Some(Semaphore::new(0)))
    }

    pub fn release(&self, sends: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(sends);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Instants of every call, in order
    pub fn sent_at(&self) -> Vec<Instant> {
        self.sent_at.lock().clone()
    }

    pub fn recipients(&self) -> Vec<Vec<String>> {
        self.recipients.lock().clone()
    }

    /// Highest number of calls that were ever running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, MailError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent_at.lock().push(Instant::now());
        self.recipients.lock().push(message.to.clone());

        let running = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| MailError::Other(e.to_string()))?
                .forget();
        }

        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        match &self.script {
            Script::Fail(message) => Err(MailError::Other(message.clone())),
            Script::FailTimes(n) if call < *n => Err(MailError::Transport(format!(
                "connection reset (call {})",
                call + 1
            ))),
            Script::Succeed | Script::FailTimes(_) => Ok(SendReceipt {
                provider_id: format!("re_{call}"),
            }),
        }
    }
}
