//! Error types for the dispatch core.

use thiserror::Error;

use crate::queue::QueueError;

/// Dispatch error type.
///
/// Only construction and stream-open failures surface to the caller;
/// every runtime failure inside the dispatch is either recovered through
/// broker redelivery or logged.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The controller was given a concurrency bound below one.
    #[error("max_concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    /// The command consumption stream could not be opened. Without an
    /// inbound source the worker cannot run; callers should treat this as
    /// fatal to the process.
    #[error("failed to open the command stream: {0}")]
    Consume(QueueError),
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
