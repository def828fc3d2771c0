//! Broker-agnostic queue facade.
//!
//! The dispatcher sees one logical queue through [`CommandQueue`] and one
//! inbound message through [`Delivery`]. Which broker sits behind them is
//! an adapter concern; the contract here is only what the dispatcher
//! relies on: idempotent declaration, a server-push consumption stream,
//! single-message publishes, and a requeue primitive that releases the
//! original delivery at the broker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::outcome::Outcome;

/// Queue operation failures.
///
/// Carried as text so the core stays broker-agnostic; adapters map their
/// native errors into the matching operation variant.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Queue declaration failed
    #[error("queue declaration failed: {0}")]
    Declare(String),

    /// The consumption stream could not be opened
    #[error("could not open the consumption stream: {0}")]
    Consume(String),

    /// A publish did not reach the broker
    #[error("publish failed: {0}")]
    Publish(String),

    /// The release-and-republish of a delivery failed
    #[error("requeue failed: {0}")]
    Requeue(String),

    /// Acknowledgement did not reach the broker
    #[error("acknowledgement failed: {0}")]
    Ack(String),

    /// An outcome could not be serialized for the wire
    #[error("message encoding failed: {0}")]
    Encode(String),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Acknowledges one delivery against the broker.
///
/// Travels inside [`Delivery`] so the dispatcher can ack without knowing
/// the broker. Implementations must be safe to call from many workers.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Single-message acknowledgement of `message_id`.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;
}

/// One inbound message: an opaque body, routing headers, and an ack token.
#[derive(Clone)]
pub struct Delivery {
    message_id: String,
    body: Vec<u8>,
    headers: HashMap<String, String>,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(
        message_id: impl Into<String>,
        body: Vec<u8>,
        headers: HashMap<String, String>,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            body,
            headers,
            acker,
        }
    }

    /// Broker-assigned identifier of this delivery.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The command payload. Opaque to the dispatcher.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Acknowledge this delivery. The dispatcher owns acknowledgement;
    /// handlers must never call this.
    pub async fn ack(&self) -> QueueResult<()> {
        self.acker.ack(&self.message_id).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("body_len", &self.body.len())
            .field("headers", &self.headers)
            .finish()
    }
}

/// One outbound message prepared for a specific downstream queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Publishing {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl Publishing {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            headers: HashMap::new(),
        }
    }

    /// An empty publishing, for the slots an outcome will not consume.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Owned handle to one logical queue on the broker.
///
/// Handles are shared across workers and must be safe for concurrent
/// publish and requeue.
#[async_trait]
pub trait CommandQueue: Send + Sync {
    /// Declares the underlying queue. Idempotent. A failure here is
    /// recoverable: the broker may accept the declaration later, or
    /// another party may make it.
    async fn create_queue(&self) -> QueueResult<()>;

    /// Opens a server-push consumption stream. The channel closing is the
    /// clean termination signal for the consumer.
    async fn consume(&self) -> QueueResult<mpsc::Receiver<Delivery>>;

    /// Publishes one message to this queue.
    async fn send(&self, publishing: Publishing) -> QueueResult<()>;

    /// Releases `original` at the broker and re-enqueues `replacement` on
    /// this queue so it is delivered again later. After success the
    /// original must not be acked by the caller.
    async fn requeue(&self, original: &Delivery, replacement: Publishing) -> QueueResult<()>;

    /// Serializes an outcome into a publishing for the error stream. The
    /// encoding is adapter-defined; producers and consumers must agree.
    fn create_message(&self, outcome: &Outcome) -> QueueResult<Publishing>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishing_with_header_chains() {
        let publishing = Publishing::new(b"payload".to_vec())
            .with_header("content-type", "application/json")
            .with_header("origin", "test");

        assert_eq!(publishing.body, b"payload");
        assert_eq!(
            publishing.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(publishing.headers.len(), 2);
    }

    #[test]
    fn empty_publishing_has_no_body_or_headers() {
        let publishing = Publishing::empty();
        assert!(publishing.body.is_empty());
        assert!(publishing.headers.is_empty());
    }
}
