//! Pieces shared by every SPYMEO mail crate: the global logging setup, the
//! component-scoped log macros and the shutdown signal passed between tasks.

pub mod logging;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
