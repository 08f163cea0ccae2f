//! Mailer for Resend-compatible transactional email HTTP APIs.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{Mailer, SendReceipt};
use crate::{
    error::MailError,
    types::{EmailMessage, Tag},
};

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "RESEND_API_KEY";

fn default_endpoint() -> String {
    "https://api.resend.com/emails".to_string()
}

/// Configuration for [`HttpMailer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpMailerConfig {
    /// Full URL of the send endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token; falls back to `RESEND_API_KEY` when unset.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    ///
    /// Unset by default, so a hung provider call stalls the queue. Setting it
    /// turns hangs into ordinary failed attempts and changes retry timing.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for HttpMailerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tags: &'a [Tag],
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentBody<'a>>,
}

#[derive(Debug, Serialize)]
struct AttachmentBody<'a> {
    filename: &'a str,
    /// Base64 of the raw bytes
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
}

impl<'a> From<&'a EmailMessage> for SendRequest<'a> {
    fn from(message: &'a EmailMessage) -> Self {
        Self {
            from: &message.from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            text: message.text.as_deref(),
            reply_to: message.reply_to.as_deref(),
            tags: &message.tags,
            headers: &message.headers,
            attachments: message
                .attachments
                .iter()
                .map(|attachment| AttachmentBody {
                    filename: &attachment.filename,
                    content: base64::engine::general_purpose::STANDARD
                        .encode(&attachment.content),
                    content_type: attachment.content_type.as_deref(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// JSON-over-HTTPS mailer.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpMailer {
    /// Create a mailer from explicit configuration.
    ///
    /// # Errors
    /// If no API key is configured or available from the environment, or the
    /// HTTP client cannot be built
    pub fn from_config(config: &HttpMailerConfig) -> Result<Self, MailError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                MailError::Configuration(format!(
                    "no provider API key configured and {API_KEY_ENV} is not set"
                ))
            })?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[tracing::instrument(level = "debug", skip_all, fields(to = ?message.to, subject = %message.subject))]
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, MailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&SendRequest::from(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map_or(body, |error| error.message);
            return Err(MailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let SendResponse { id } = response.json().await?;
        Ok(SendReceipt { provider_id: id })
    }
}
