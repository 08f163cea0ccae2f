//! Command-line utility for managing a running SPYMEO mail service
//!
//! This tool talks to the service over its control socket and provides:
//! - Queue inspection (stats, per-job status, listings, job details)
//! - Cancelling pending jobs and triggering cleanup passes
//! - Queueing ad-hoc messages
//! - System status and health checks

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use spymeo_control::{
    ControlClient, DEFAULT_CONTROL_SOCKET, QueueCommand, Request, RequestCommand, ResponseData,
    ResponsePayload, SystemCommand,
};

/// Command-line utility for managing the SPYMEO mail service
#[derive(Parser, Debug)]
#[command(name = "spymeoctl")]
#[command(about = "Manage the SPYMEO email dispatch queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short = 'c', long, default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Email queue commands
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// System status and health
    System {
        #[command(subcommand)]
        action: SystemAction,
    },
}

#[derive(Subcommand, Debug)]
enum SystemAction {
    /// Check if the service is responding
    Ping,
    /// Get system status
    Status,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// Show queue statistics
    Stats {
        /// Watch mode - continuously update statistics
        #[arg(long)]
        watch: bool,

        /// Update interval in seconds (for watch mode)
        #[arg(long, default_value = "2")]
        interval: u64,
    },
    /// Show which container holds a job
    Status {
        /// Job ID to look up
        job_id: String,
    },
    /// View detailed information about a job
    View {
        /// Job ID to view
        job_id: String,
    },
    /// List jobs in the queue
    List {
        /// Filter by status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },
    /// Cancel a job that has not been picked up yet
    Cancel {
        /// Job ID to cancel
        job_id: String,
    },
    /// Purge completed jobs
    Cleanup {
        /// Purge jobs older than this many milliseconds (default: configured retention)
        #[arg(long)]
        older_than_ms: Option<u64>,
    },
    /// Queue a message from the default sender
    Send {
        /// Recipient address (repeat for several)
        #[arg(long, required = true)]
        to: Vec<String>,

        #[arg(long)]
        subject: String,

        /// HTML body
        #[arg(long)]
        html: String,

        /// Plain-text alternative
        #[arg(long)]
        text: Option<String>,

        /// Hold the job for this many seconds before it may be sent
        #[arg(long)]
        delay_secs: Option<u64>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum StatusFilter {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StatusFilter {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = check_control_socket(&cli.control_socket)?;

    match cli.command {
        Commands::Queue { action } => match action {
            QueueAction::Stats { watch, interval } => {
                cmd_stats(client, watch, interval).await?;
            }
            action => handle_queue_command(&client, action).await?,
        },
        Commands::System { action } => {
            handle_system_command(&client, action).await?;
        }
    }

    Ok(())
}

/// Check control socket connectivity and return client
fn check_control_socket(socket_path: &std::path::Path) -> anyhow::Result<ControlClient> {
    let client = ControlClient::new(socket_path);

    if let Err(e) = client.check_socket_exists() {
        anyhow::bail!(
            "Cannot connect to SPYMEO control socket at {}.\n\
             Error: {e}\n\
             \n\
             Is the SPYMEO mail service running?\n\
             You can configure the socket path with --control-socket or in spymeo.config.ron",
            socket_path.display()
        );
    }

    Ok(client)
}

/// Unwrap the data payload of a response, failing on anything else
fn expect_data(payload: ResponsePayload) -> anyhow::Result<ResponseData> {
    match payload {
        ResponsePayload::Data(data) => Ok(*data),
        ResponsePayload::Ok => anyhow::bail!("Server returned no data"),
        ResponsePayload::Error(err) => anyhow::bail!("Server error: {err}"),
    }
}

/// Show queue statistics
async fn cmd_stats(client: ControlClient, watch: bool, interval: u64) -> anyhow::Result<()> {
    if watch {
        // One connection for the whole session
        let client = client.with_persistent_connection();

        loop {
            // Clear screen
            print!("\x1B[2J\x1B[1;1H");

            display_stats(&client).await?;

            println!("\nPress Ctrl+C to exit");

            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    display_stats(&client).await
}

/// Display queue statistics
async fn display_stats(client: &ControlClient) -> anyhow::Result<()> {
    let response = client
        .send_request(Request::new(RequestCommand::Queue(QueueCommand::Stats)))
        .await?;

    match expect_data(response.payload)? {
        ResponseData::QueueStats(stats) => {
            println!("=== SPYMEO Queue Statistics ===\n");
            println!("{stats}");
        }
        data => println!("Unexpected response for stats command: {data:?}"),
    }

    Ok(())
}

/// Handle email queue commands other than stats
async fn handle_queue_command(client: &ControlClient, action: QueueAction) -> anyhow::Result<()> {
    let command = match action {
        QueueAction::Stats { .. } => QueueCommand::Stats,
        QueueAction::Status { job_id } => QueueCommand::Status { job_id },
        QueueAction::View { job_id } => QueueCommand::View { job_id },
        QueueAction::List { status } => QueueCommand::List {
            status_filter: status.map(|s| s.as_str().to_string()),
        },
        QueueAction::Cancel { job_id } => QueueCommand::Cancel { job_id },
        QueueAction::Cleanup { older_than_ms } => QueueCommand::Cleanup { older_than_ms },
        QueueAction::Send {
            to,
            subject,
            html,
            text,
            delay_secs,
        } => QueueCommand::Send {
            to,
            subject,
            html,
            text,
            delay_secs,
        },
    };

    let response = client
        .send_request(Request::new(RequestCommand::Queue(command)))
        .await?;

    match expect_data(response.payload)? {
        ResponseData::JobStatus { job_id, status } => {
            println!("{job_id}: {status}");
        }
        ResponseData::JobDetails(details) => {
            println!("{details}");
            println!("Age:       {}", format_age(details.created_at_ms));
        }
        ResponseData::JobList(jobs) => {
            println!(
                "{:<28} {:<12} {:<9} {:<8} {}",
                "JOB ID", "STATUS", "ATTEMPTS", "AGE", "TO"
            );
            println!("{}", "-".repeat(80));

            for job in &jobs {
                println!(
                    "{:<28} {:<12} {:<9} {:<8} {}",
                    job.id,
                    job.status,
                    job.attempts,
                    format_age(job.created_at_ms),
                    job.to.join(", ")
                );
            }

            println!("\nTotal: {} job(s)", jobs.len());
        }
        ResponseData::Cancelled { job_id, cancelled } => {
            if cancelled {
                println!("✓ Cancelled {job_id}");
            } else {
                anyhow::bail!(
                    "Job {job_id} could not be cancelled (unknown, in flight or already finished)"
                );
            }
        }
        ResponseData::CleanedUp(removed) => {
            println!("✓ Purged {removed} completed job(s)");
        }
        ResponseData::Queued(job_id) => {
            println!("✓ Queued {job_id}");
        }
        ResponseData::Message(msg) => {
            println!("✓ {msg}");
        }
        data @ (ResponseData::SystemStatus(_) | ResponseData::QueueStats(_)) => {
            println!("Unexpected response for queue command: {data:?}");
        }
    }

    Ok(())
}

/// Handle system management commands
async fn handle_system_command(client: &ControlClient, action: SystemAction) -> anyhow::Result<()> {
    let request = match action {
        SystemAction::Ping => Request::new(RequestCommand::System(SystemCommand::Ping)),
        SystemAction::Status => Request::new(RequestCommand::System(SystemCommand::Status)),
    };

    let response = client.send_request(request).await?;

    match response.payload {
        ResponsePayload::Ok => {
            println!("✓ Pong! SPYMEO mail service is responding");
        }
        ResponsePayload::Data(data) => match *data {
            ResponseData::SystemStatus(status) => {
                println!("=== SPYMEO Mail Service Status ===\n");
                println!("Version:   {}", status.version);
                println!("Uptime:    {}", format_duration(status.uptime_secs));
                println!(
                    "Delivery:  {}",
                    if status.delivery_enabled {
                        "enabled"
                    } else {
                        "disabled (dry-run)"
                    }
                );
                println!("Queued:    {} job(s)", status.queue_size);
            }
            data => {
                println!("Unexpected response for system command: {data:?}");
            }
        },
        ResponsePayload::Error(err) => {
            anyhow::bail!("Server error: {err}");
        }
    }

    Ok(())
}

/// Format age (time since timestamp) as human-readable
fn format_age(timestamp_ms: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let age_secs = now.saturating_sub(u128::from(timestamp_ms)) / 1000;

    if age_secs < 60 {
        format!("{age_secs}s")
    } else if age_secs < 3600 {
        format!("{}m", age_secs / 60)
    } else if age_secs < 86400 {
        format!("{}h", age_secs / 3600)
    } else {
        format!("{}d", age_secs / 86400)
    }
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let rem_secs = secs % 60;
        format!("{mins}m {rem_secs}s")
    } else if secs < 86400 {
        let hours = secs / 3600;
        let rem_mins = (secs % 3600) / 60;
        format!("{hours}h {rem_mins}m")
    } else {
        let days = secs / 86400;
        let rem_hours = (secs % 86400) / 3600;
        format!("{days}d {rem_hours}h")
    }
}
