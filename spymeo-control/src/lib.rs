//! Control protocol for managing a running SPYMEO mail service
//!
//! This module provides an IPC mechanism using Unix domain sockets to:
//! - Inspect the email dispatch queue (stats, per-job status, listings)
//! - Cancel pending jobs and trigger cleanup passes
//! - Queue ad-hoc messages and check service health
//!
//! Frames are a big-endian `u32` length followed by a bincode payload.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    PROTOCOL_VERSION, QueueCommand, Request, RequestCommand, Response, ResponseData,
    ResponsePayload, SystemCommand,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/spymeo.sock";
