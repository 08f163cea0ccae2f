//! Composition root for the SPYMEO mail service: configuration, wiring of the
//! dispatch queue to its delivery collaborator, and the control socket.

pub mod control_handler;
pub mod controller;

pub use control_handler::SpymeoControlHandler;
pub use controller::{ControlConfig, SHUTDOWN_BROADCAST, Spymeo};
