//! drover-redis: Redis Streams realisation of the drover queue facade.
//!
//! Maps the broker contract onto consumer groups:
//!
//! - **declare** is `XGROUP CREATE ... MKSTREAM`, with BUSYGROUP treated
//!   as the idempotent-success case
//! - **consume** is a blocking `XREADGROUP` pump feeding a bounded
//!   channel, so dispatcher backpressure reaches the broker
//! - **ack** is `XACK` against the consumer group
//! - **requeue** atomically `XACK`s the original and `XADD`s the
//!   replacement in one MULTI/EXEC transaction, which is why a
//!   successfully requeued delivery needs no separate ack
//!
//! Anything left unacked sits in the pending-entries list and is
//! redelivered, giving the at-least-once semantics the dispatcher builds
//! on.

pub mod config;
pub mod error;
pub mod logging;
pub mod streams;

pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult};
pub use streams::RedisQueue;
