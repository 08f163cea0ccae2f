//! Control protocol types and serialization

use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

use chrono::{TimeZone, Utc, offset::LocalResult};
use serde::{Deserialize, Serialize};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// bincode configuration shared by both ends of the socket
pub(crate) const fn wire_config() -> bincode::config::Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
    bincode::config::NoLimit,
> {
    bincode::config::legacy()
}

/// Format timestamp (milliseconds since epoch) as human-readable
fn format_timestamp(timestamp_ms: u64) -> String {
    let datetime = Utc.timestamp_millis_opt(i64::try_from(timestamp_ms).unwrap_or(0));
    if let LocalResult::Single(dt) = datetime {
        dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    } else {
        "unknown".to_string()
    }
}

/// Request sent to the control server (versioned wrapper)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    pub version: u32,
    /// The actual command to execute
    pub command: RequestCommand,
}

/// Request command types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestCommand {
    /// Service management commands
    System(SystemCommand),
    /// Email queue commands
    Queue(QueueCommand),
}

/// Service management commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemCommand {
    /// Health check / ping
    Ping,
    /// Get service status and statistics
    Status,
}

/// Email queue commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueCommand {
    /// Container counts and rate-limit counters
    Stats,
    /// Which container currently holds a job
    Status {
        /// Job ID to look up
        job_id: String,
    },
    /// Detailed information about a single job
    View {
        /// Job ID to view
        job_id: String,
    },
    /// List jobs
    List {
        /// Filter by status (optional): pending, processing, completed, failed
        status_filter: Option<String>,
    },
    /// Remove a job that has not been picked up yet
    Cancel {
        /// Job ID to cancel
        job_id: String,
    },
    /// Purge completed jobs
    Cleanup {
        /// Age cutoff; the configured retention when absent
        older_than_ms: Option<u64>,
    },
    /// Queue an ad-hoc message from the default sender
    Send {
        to: Vec<String>,
        subject: String,
        html: String,
        text: Option<String>,
        /// Delay before the job becomes eligible for dispatch
        delay_secs: Option<u64>,
    },
}

/// Response from the control server (versioned wrapper)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    pub version: u32,
    /// The actual response payload
    pub payload: ResponsePayload,
}

/// Response payload types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Command succeeded
    Ok,
    /// Command succeeded with data
    Data(Box<ResponseData>),
    /// Command failed with error message
    Error(String),
}

/// Response data types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Service status information
    SystemStatus(SystemStatus),
    /// Queue statistics
    QueueStats(QueueStats),
    /// Container holding a job (`pending`, ..., `not_found`)
    JobStatus {
        job_id: String,
        status: String,
    },
    /// Single job details
    JobDetails(JobDetails),
    /// Job listing
    JobList(Vec<JobSummary>),
    /// Outcome of a cancel request
    Cancelled {
        job_id: String,
        cancelled: bool,
    },
    /// Number of records purged by a cleanup pass
    CleanedUp(usize),
    /// Id assigned to a newly queued job
    Queued(String),
    /// Simple string message
    Message(String),
}

/// Service status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Service version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// `false` when the queue runs in dry-run mode
    pub delivery_enabled: bool,
    /// Jobs waiting or in flight
    pub queue_size: usize,
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version:   {}", self.version)?;
        writeln!(f, "Uptime:    {}s", self.uptime_secs)?;
        writeln!(
            f,
            "Delivery:  {}",
            if self.delivery_enabled {
                "enabled"
            } else {
                "disabled (dry-run)"
            }
        )?;
        write!(f, "Queued:    {}", self.queue_size)
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Successful provider sends since start-up
    pub total_sent: u64,
    pub sent_this_second: u32,
    pub sent_this_minute: u32,
    pub sent_this_hour: u32,
}

impl Display for QueueStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pending:     {}", self.pending)?;
        writeln!(f, "Processing:  {}", self.processing)?;
        writeln!(f, "Completed:   {}", self.completed)?;
        writeln!(f, "Failed:      {}", self.failed)?;
        writeln!(f, "Total sent:  {}", self.total_sent)?;
        write!(
            f,
            "Rate:        {}/s  {}/min  {}/h",
            self.sent_this_second, self.sent_this_minute, self.sent_this_hour
        )
    }
}

/// Job summary (for list command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job ID
    pub id: String,
    /// Recipient addresses
    pub to: Vec<String>,
    pub subject: String,
    /// Container holding the job
    pub status: String,
    /// Dispatch attempts made so far
    pub attempts: u32,
    /// Time the job was queued (Unix timestamp in milliseconds)
    pub created_at_ms: u64,
}

impl Display for JobSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ID:        {}", self.id)?;
        writeln!(f, "To:        {}", self.to.join(", "))?;
        writeln!(f, "Subject:   {}", self.subject)?;
        writeln!(f, "Status:    {}", self.status)?;
        writeln!(f, "Attempts:  {}", self.attempts)?;
        write!(f, "Queued:    {}", format_timestamp(self.created_at_ms))
    }
}

/// Job details (for view command)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Time until the job becomes eligible again, if it is waiting on a schedule
    pub due_in_ms: Option<u64>,
    pub last_error: Option<String>,
    /// Provider message id, once delivered
    pub provider_id: Option<String>,
    /// Time the job was queued (Unix timestamp in milliseconds)
    pub created_at_ms: u64,
    /// Tag names and values
    pub tags: Vec<(String, String)>,
    pub attachments: Vec<String>,
}

impl Display for JobDetails {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ID:        {}", self.id)?;
        writeln!(f, "From:      {}", self.from)?;
        writeln!(f, "To:        {}", self.to.join(", "))?;
        writeln!(f, "Subject:   {}", self.subject)?;
        writeln!(f, "Status:    {}", self.status)?;
        writeln!(f, "Attempts:  {}/{}", self.attempts, self.max_attempts)?;
        if let Some(due_in_ms) = self.due_in_ms {
            writeln!(f, "Due in:    {:.1}s", Duration::from_millis(due_in_ms).as_secs_f64())?;
        }
        if let Some(ref error) = self.last_error {
            writeln!(f, "Last error: {error}")?;
        }
        if let Some(ref provider_id) = self.provider_id {
            writeln!(f, "Provider:  {provider_id}")?;
        }
        if !self.tags.is_empty() {
            let tags: Vec<String> = self
                .tags
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            writeln!(f, "Tags:      {}", tags.join(", "))?;
        }
        if !self.attachments.is_empty() {
            writeln!(f, "Files:     {}", self.attachments.join(", "))?;
        }
        write!(f, "Queued:    {}", format_timestamp(self.created_at_ms))
    }
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
        }
    }

    /// Check if the request version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        // Only exact version match is supported
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    /// Create an error response
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    /// Create a success response with no data
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    /// Create a response with data
    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    /// Check if the response indicates success (not an error)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Check if the response version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}
