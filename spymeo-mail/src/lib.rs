//! In-process transactional email dispatch queue
//!
//! Callers enqueue messages and get a [`JobId`] back immediately. A single
//! background worker drains the queue through a [`Mailer`], honouring delayed
//! sends, three fixed rate windows and exponential backoff with jitter between
//! attempts. Outcomes are observable only through [`MailQueue::job_status`],
//! [`MailQueue::stats`] and the logs; nothing is reported back to the caller.
//!
//! ```text
//! enqueue ─▶ Pending ─▶ Processing ─▶ Completed
//!              ▲            │
//!              └── retry ───┴──▶ Failed
//! ```
//!
//! All state lives in memory: a restart loses every job.

pub mod config;
pub mod error;
pub mod mailer;
pub mod policy;
pub mod processor;
pub(crate) mod queue;
pub mod rate_limiter;
pub mod service;
pub mod types;

pub use config::MailConfig;
pub use error::{MailError, QueueError};
pub use mailer::{HttpMailer, HttpMailerConfig, Mailer, SendReceipt};
pub use policy::RetryPolicy;
pub use processor::MailQueue;
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use service::MailQueryService;
pub use types::{
    Attachment, EmailJob, EmailMessage, EmailMessageBuilder, JobId, JobStatus, QueueStats, Tag,
};
