//! Control handler implementation for the SPYMEO mail service
//!
//! This module implements the `CommandHandler` trait to answer control requests
//! against the running dispatch queue.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use spymeo_common::internal;
use spymeo_control::{
    ControlError, QueueCommand, Request, RequestCommand, Response, ResponseData, SystemCommand,
    protocol::{JobDetails, JobSummary, QueueStats, SystemStatus},
    server::CommandHandler,
};
use spymeo_mail::{EmailJob, JobId, JobStatus, MailQueryService};

/// Handler for control commands
pub struct SpymeoControlHandler {
    mail: Arc<dyn MailQueryService>,
    /// Server start time for uptime calculation
    start_time: Instant,
}

impl SpymeoControlHandler {
    /// Create a new control handler
    #[must_use]
    pub fn new(mail: Arc<dyn MailQueryService>) -> Self {
        Self {
            mail,
            start_time: Instant::now(),
        }
    }
}

#[async_trait]
impl CommandHandler for SpymeoControlHandler {
    async fn handle_request(&self, request: Request) -> spymeo_control::Result<Response> {
        match request.command {
            RequestCommand::System(command) => Ok(self.handle_system_command(command)),
            RequestCommand::Queue(command) => self.handle_queue_command(command),
        }
    }
}

fn parse_job_id(job_id: &str) -> spymeo_control::Result<JobId> {
    job_id
        .parse()
        .map_err(|e| ControlError::ServerError(format!("Invalid job id {job_id}: {e}")))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn created_at_ms(job: &EmailJob) -> u64 {
    u64::try_from(job.created_at.timestamp_millis()).unwrap_or(0)
}

fn summarise(status: JobStatus, job: &EmailJob) -> JobSummary {
    JobSummary {
        id: job.id.to_string(),
        to: job.message.to.clone(),
        subject: job.message.subject.clone(),
        status: status.to_string(),
        attempts: job.attempts,
        created_at_ms: created_at_ms(job),
    }
}

fn describe(status: JobStatus, job: &EmailJob) -> JobDetails {
    let now = tokio::time::Instant::now();
    let due_in_ms = job
        .scheduled_for
        .map(|at| at.saturating_duration_since(now))
        .filter(|remaining| !remaining.is_zero())
        .map(millis);

    JobDetails {
        id: job.id.to_string(),
        from: job.message.from.clone(),
        to: job.message.to.clone(),
        subject: job.message.subject.clone(),
        status: status.to_string(),
        attempts: job.attempts,
        max_attempts: job.max_attempts,
        due_in_ms,
        last_error: job.last_error.clone(),
        provider_id: job.provider_id.clone(),
        created_at_ms: created_at_ms(job),
        tags: job
            .message
            .tags
            .iter()
            .map(|tag| (tag.name.clone(), tag.value.clone()))
            .collect(),
        attachments: job
            .message
            .attachments
            .iter()
            .map(|attachment| attachment.filename.clone())
            .collect(),
    }
}

impl SpymeoControlHandler {
    /// Handle system management commands
    fn handle_system_command(&self, command: SystemCommand) -> Response {
        match command {
            SystemCommand::Ping => Response::ok(),

            SystemCommand::Status => {
                let stats = self.mail.stats();

                Response::data(ResponseData::SystemStatus(SystemStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: self.start_time.elapsed().as_secs(),
                    delivery_enabled: self.mail.delivery_enabled(),
                    queue_size: stats.pending + stats.processing,
                }))
            }
        }
    }

    /// Handle email queue commands
    fn handle_queue_command(&self, command: QueueCommand) -> spymeo_control::Result<Response> {
        match command {
            QueueCommand::Stats => {
                let stats = self.mail.stats();
                let rate = self.mail.rate_limit_stats();

                Ok(Response::data(ResponseData::QueueStats(QueueStats {
                    pending: stats.pending,
                    processing: stats.processing,
                    completed: stats.completed,
                    failed: stats.failed,
                    total_sent: stats.total_sent,
                    sent_this_second: rate.sent_this_second,
                    sent_this_minute: rate.sent_this_minute,
                    sent_this_hour: rate.sent_this_hour,
                })))
            }

            QueueCommand::Status { job_id } => {
                let id = parse_job_id(&job_id)?;
                let status = self.mail.job_status(&id);

                Ok(Response::data(ResponseData::JobStatus {
                    job_id,
                    status: status.to_string(),
                }))
            }

            QueueCommand::View { job_id } => {
                let id = parse_job_id(&job_id)?;
                let Some((status, job)) = self.mail.job(&id) else {
                    return Err(ControlError::ServerError(format!("Job not found: {job_id}")));
                };

                Ok(Response::data(ResponseData::JobDetails(describe(
                    status, &job,
                ))))
            }

            QueueCommand::List { status_filter } => {
                let filter = status_filter
                    .as_deref()
                    .map(str::parse::<JobStatus>)
                    .transpose()
                    .map_err(ControlError::ServerError)?;

                let jobs = self
                    .mail
                    .jobs(filter)
                    .iter()
                    .map(|(status, job)| summarise(*status, job))
                    .collect();

                Ok(Response::data(ResponseData::JobList(jobs)))
            }

            QueueCommand::Cancel { job_id } => {
                let id = parse_job_id(&job_id)?;
                let cancelled = self.mail.cancel_job(&id);

                Ok(Response::data(ResponseData::Cancelled { job_id, cancelled }))
            }

            QueueCommand::Cleanup { older_than_ms } => {
                let older_than =
                    older_than_ms.map_or_else(|| self.mail.retention(), Duration::from_millis);
                let removed = self.mail.cleanup(older_than);

                Ok(Response::data(ResponseData::CleanedUp(removed)))
            }

            QueueCommand::Send {
                to,
                subject,
                html,
                text,
                delay_secs,
            } => {
                let mut builder = self.mail.message().to_many(to).subject(subject).html(html);
                if let Some(text) = text {
                    builder = builder.text(text);
                }

                let message = builder
                    .build()
                    .map_err(|e| ControlError::ServerError(e.to_string()))?;

                let id = self
                    .mail
                    .submit(message, delay_secs.map(Duration::from_secs));

                internal!(level = INFO, "Queued email job {id} via control socket");

                Ok(Response::data(ResponseData::Queued(id.to_string())))
            }
        }
    }
}
