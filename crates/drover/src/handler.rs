//! The delivery handler contract.

use async_trait::async_trait;
use tracing::debug;

use crate::outcome::Outcome;
use crate::queue::{Delivery, Publishing};

/// Business logic for one delivery.
///
/// # Scope
///
/// `process` returns the completion publishing, the requeue publishing,
/// and the outcome that tells the dispatcher which of them to use. The
/// dispatcher owns acknowledgement and all broker traffic; handlers must
/// not ack or publish on their own. A publishing the outcome will not
/// consume may be left empty.
///
/// Implementations are invoked concurrently, up to the controller's
/// concurrency bound.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn process(&self, delivery: &Delivery) -> (Publishing, Publishing, Outcome);
}

/// Marks every command all-done, echoing the body to the completion queue.
///
/// Useful for draining a backed-up commands queue and for smoke-testing a
/// deployment end to end; real deployments provide their own handler.
pub struct SinkHandler;

#[async_trait]
impl DeliveryHandler for SinkHandler {
    async fn process(&self, delivery: &Delivery) -> (Publishing, Publishing, Outcome) {
        debug!(
            message_id = %delivery.message_id(),
            bytes = delivery.body().len(),
            "sinking command"
        );
        (
            Publishing::new(delivery.body().to_vec()),
            Publishing::empty(),
            Outcome::all_done(),
        )
    }
}
