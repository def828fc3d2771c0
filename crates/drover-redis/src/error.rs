//! Error types for the Redis broker adapter.

use thiserror::Error;

/// Broker adapter error type.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Malformed stream entry or unexpected reply shape
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Dispatch core error, surfaced when running a worker
    #[error("dispatch error: {0}")]
    Dispatch(#[from] drover::DispatchError),
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
