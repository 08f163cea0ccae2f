//! Policies applied by the dispatch worker

mod retry;

pub use retry::RetryPolicy;
