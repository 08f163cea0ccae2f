//! Error types for the mail queue and its delivery collaborators.
//!
//! Delivery errors are never surfaced to the code that enqueued a job; they
//! are recorded on the job as `last_error` and drive the retry policy. Every
//! variant is retried the same way, there is no permanent/temporary split.

use thiserror::Error;

/// Failure reported by a [`Mailer`](crate::Mailer) for a single send.
#[derive(Debug, Error)]
pub enum MailError {
    /// The provider answered but refused the message.
    #[error("Rejected by provider ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request never produced a provider answer (connect, TLS, I/O).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The message could not be turned into a provider request.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The collaborator is missing required configuration.
    #[error("Mailer configuration error: {0}")]
    Configuration(String),

    /// Anything else a custom collaborator wants to report.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for MailError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_builder() {
            Self::Configuration(error.to_string())
        } else if error.is_decode() {
            Self::Other(format!("Unreadable provider response: {error}"))
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Errors raised while building or configuring a [`MailQueue`](crate::MailQueue).
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was constructed outside of a tokio runtime.
    #[error("Mail queue requires a running tokio runtime: {0}")]
    NoRuntime(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    /// The message builder was missing a required field.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl QueueError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display_includes_status() {
        let error = MailError::Rejected {
            status: 422,
            message: "Invalid `to` field".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Rejected by provider (422): Invalid `to` field"
        );
    }

    #[test]
    fn other_is_displayed_verbatim() {
        assert_eq!(MailError::Other("boom".to_string()).to_string(), "boom");
    }

    #[test]
    fn invalid_configuration_display() {
        let error = QueueError::invalid("rate_limit.max_per_second", "must be at least 1");
        assert_eq!(
            error.to_string(),
            "Invalid configuration for rate_limit.max_per_second: must be at least 1"
        );
    }
}
