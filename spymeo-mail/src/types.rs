//! Type definitions for queued email jobs

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::QueueError;

/// Identifier for a queued email job
///
/// A ULID: the leading 48 bits are the enqueue timestamp, the rest is random,
/// so ids sort by creation time and are unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(ulid::Ulid);

impl JobId {
    /// Generate a new unique job ID
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Milliseconds since the Unix epoch at which this id was generated
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s.trim()).map(Self)
    }
}

/// Provider-side categorisation tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

/// A file attached to an outgoing email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// The payload handed to the delivery collaborator
///
/// No validation happens when a message is queued: a malformed address is only
/// discovered when the provider rejects it, which costs one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub from: String,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl EmailMessage {
    /// Create a new message builder
    pub fn builder() -> EmailMessageBuilder {
        EmailMessageBuilder::default()
    }
}

/// Builder for [`EmailMessage`]
#[derive(Debug, Default, Clone)]
pub struct EmailMessageBuilder {
    to: Vec<String>,
    from: Option<String>,
    subject: Option<String>,
    html: Option<String>,
    text: Option<String>,
    reply_to: Option<String>,
    tags: Vec<Tag>,
    headers: BTreeMap<String, String>,
    attachments: Vec<Attachment>,
}

impl EmailMessageBuilder {
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    #[must_use]
    pub fn to_many(mut self, addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Build the message.
    ///
    /// Only presence is checked here; address syntax is left to the provider.
    ///
    /// # Errors
    /// If there is no recipient, sender, subject or HTML body
    pub fn build(self) -> Result<EmailMessage, QueueError> {
        if self.to.is_empty() {
            return Err(QueueError::MissingField("to"));
        }

        Ok(EmailMessage {
            to: self.to,
            from: self.from.ok_or(QueueError::MissingField("from"))?,
            subject: self.subject.ok_or(QueueError::MissingField("subject"))?,
            html: self.html.ok_or(QueueError::MissingField("html"))?,
            text: self.text,
            reply_to: self.reply_to,
            tags: self.tags,
            headers: self.headers,
            attachments: self.attachments,
        })
    }
}

/// One queued email with its retry state
#[derive(Debug, Clone)]
pub struct EmailJob {
    pub id: JobId,
    pub message: Arc<EmailMessage>,
    /// Not eligible for dispatch before this instant
    pub scheduled_for: Option<Instant>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    /// Provider message id, set once delivered
    pub provider_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub(crate) enqueued_at: Instant,
}

impl EmailJob {
    pub(crate) fn new(
        message: Arc<EmailMessage>,
        max_attempts: u32,
        scheduled_for: Option<Instant>,
    ) -> Self {
        Self {
            id: JobId::generate(),
            message,
            scheduled_for,
            attempts: 0,
            max_attempts,
            last_error: None,
            provider_id: None,
            created_at: Utc::now(),
            enqueued_at: Instant::now(),
        }
    }

    /// Whether the job may be dispatched at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        self.scheduled_for.is_none_or(|at| at <= now)
    }

    /// Monotonic instant at which the job was accepted
    pub const fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}

/// Which of the four containers currently holds a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    NotFound,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "not_found" => Ok(Self::NotFound),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Successful provider sends since start-up (dry-run completions excluded)
    pub total_sent: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn message() -> EmailMessage {
        EmailMessage::builder()
            .to("client@example.com")
            .from("noreply@spymeo.fr")
            .subject("Votre rendez-vous")
            .html("<p>Bonjour</p>")
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_core_fields() {
        let missing_to = EmailMessage::builder()
            .from("a@b.c")
            .subject("s")
            .html("h")
            .build();
        assert!(matches!(missing_to, Err(QueueError::MissingField("to"))));

        let missing_html = EmailMessage::builder()
            .to("x@y.z")
            .from("a@b.c")
            .subject("s")
            .build();
        assert!(matches!(missing_html, Err(QueueError::MissingField("html"))));
    }

    #[test]
    fn builder_collects_optional_parts() {
        let message = EmailMessage::builder()
            .to_many(["a@example.com", "b@example.com"])
            .from("noreply@spymeo.fr")
            .subject("Facture")
            .html("<p>Merci</p>")
            .text("Merci")
            .reply_to("support@spymeo.fr")
            .tag("category", "invoice")
            .header("X-Entity-Ref-ID", "42")
            .attachment(Attachment {
                filename: "facture.pdf".to_string(),
                content: vec![0x25, 0x50, 0x44, 0x46],
                content_type: Some("application/pdf".to_string()),
            })
            .build()
            .unwrap();

        assert_eq!(message.to.len(), 2);
        assert_eq!(message.text.as_deref(), Some("Merci"));
        assert_eq!(message.tags[0].value, "invoice");
        assert_eq!(message.headers.get("X-Entity-Ref-ID").map(String::as_str), Some("42"));
        assert_eq!(message.attachments[0].filename, "facture.pdf");
    }

    #[test]
    fn job_ids_are_unique_and_parse_back() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<JobId>().unwrap(), a);
        assert!("not-a-job".parse::<JobId>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn due_respects_schedule() {
        let now = Instant::now();
        let mut job = EmailJob::new(Arc::new(message()), 3, None);
        assert!(job.is_due(now));

        job.scheduled_for = Some(now + Duration::from_secs(5));
        assert!(!job.is_due(now));
        assert!(!job.is_due(now + Duration::from_millis(4_999)));
        assert!(job.is_due(now + Duration::from_secs(5)));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::NotFound,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("sent".parse::<JobStatus>().is_err());
    }
}
