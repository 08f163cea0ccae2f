//! Delivery collaborators.
//!
//! The queue only needs something that can send one message and either hand
//! back a provider id or an error. Anything satisfying [`Mailer`] works: an
//! HTTP API client, an SMTP client, or a test double.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::{HttpMailer, HttpMailerConfig};

use crate::{error::MailError, types::EmailMessage};

/// Acknowledgement returned by a successful send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Identifier assigned by the provider
    pub provider_id: String,
}

/// Async email sending trait.
///
/// Called by the dispatch worker at most once at a time. No timeout is applied
/// around the call: a send that never returns stalls the queue.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Send one message.
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, MailError>;
}
