//! The command controller: a concurrency-limited consumer that drains the
//! commands queue, hands each delivery to the handler, and routes the
//! outcome.
//!
//! # Acknowledgement contract
//!
//! Per delivery, `ack` is invoked at most once:
//!
//! - trap outcomes are acked and dropped
//! - requeue outcomes are never acked here: a successful requeue releases
//!   the original at the broker, a failed one leaves it for redelivery
//! - all-done and fatal outcomes are acked only after the completion
//!   publish succeeds
//! - everything else is acked directly
//!
//! The error stream is written best-effort from a detached task so that
//! completion latency never waits on error reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::handler::DeliveryHandler;
use crate::outcome::Outcome;
use crate::queue::{CommandQueue, Delivery};

/// Bounded-concurrency dispatcher over the commands queue.
///
/// Owns the three queue handles and the handler; outlives every in-flight
/// delivery it dispatches.
pub struct CommandController {
    cmds: Arc<dyn CommandQueue>,
    errors: Arc<dyn CommandQueue>,
    completion: Arc<dyn CommandQueue>,
    handler: Arc<dyn DeliveryHandler>,
    limiter: Arc<Semaphore>,
    started: AtomicBool,
}

impl CommandController {
    /// Builds a controller that dispatches at most `max_concurrency`
    /// deliveries at a time.
    ///
    /// Declares the commands and completion queues. A declaration failure
    /// is logged and swallowed: the worker can still come up and recover
    /// once the broker accepts the declaration.
    pub async fn new(
        max_concurrency: usize,
        cmds: Arc<dyn CommandQueue>,
        errors: Arc<dyn CommandQueue>,
        completion: Arc<dyn CommandQueue>,
        handler: Arc<dyn DeliveryHandler>,
    ) -> DispatchResult<Self> {
        if max_concurrency < 1 {
            return Err(DispatchError::InvalidConcurrency(max_concurrency));
        }

        if let Err(err) = cmds.create_queue().await {
            debug!(error = %err, "failed attempt to create the commands queue");
        }
        if let Err(err) = completion.create_queue().await {
            debug!(error = %err, "failed attempt to create the completion queue");
        }

        Ok(Self {
            cmds,
            errors,
            completion,
            handler,
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            started: AtomicBool::new(false),
        })
    }

    /// Runs the dispatch loop until the consumption stream closes.
    ///
    /// Only the first call runs the loop; every later call is a no-op
    /// returning immediately. An error opening the stream leaves the
    /// worker without an inbound source; callers should treat it as fatal
    /// to the process.
    pub async fn start(&self) -> DispatchResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.dispatch_loop().await
    }

    async fn dispatch_loop(&self) -> DispatchResult<()> {
        let mut deliveries = self.cmds.consume().await.map_err(DispatchError::Consume)?;

        while let Some(delivery) = deliveries.recv().await {
            debug!(message_id = %delivery.message_id(), "received a command");

            // Backpressure: the loop stalls here until a worker slot
            // frees up.
            let permit = Arc::clone(&self.limiter)
                .acquire_owned()
                .await
                .expect("dispatch semaphore closed");

            let cmds = Arc::clone(&self.cmds);
            let errors = Arc::clone(&self.errors);
            let completion = Arc::clone(&self.completion);
            let handler = Arc::clone(&self.handler);

            tokio::spawn(async move {
                // Held for the whole task so the permit releases on every
                // exit path, panics included.
                let _permit = permit;
                handle_delivery(cmds, errors, completion, handler, delivery).await;
            });
        }

        info!("command stream closed, dispatch loop exiting");
        Ok(())
    }
}

async fn handle_delivery(
    cmds: Arc<dyn CommandQueue>,
    errors: Arc<dyn CommandQueue>,
    completion: Arc<dyn CommandQueue>,
    handler: Arc<dyn DeliveryHandler>,
    delivery: Delivery,
) {
    let (completion_pub, requeue_pub, outcome) = handler.process(&delivery).await;

    if outcome.is_trap() {
        info!(message_id = %delivery.message_id(), "falling through due to trap");
        ack(&delivery).await;
        return;
    }

    if outcome.is_requeue() {
        info!(
            message_id = %delivery.message_id(),
            outcome = outcome.kind().label(),
            "command needs another attempt"
        );
        // No ack on either path: success releases the original at the
        // broker, failure leaves it pending for redelivery.
        if let Err(err) = cmds.requeue(&delivery, requeue_pub).await {
            error!(
                message_id = %delivery.message_id(),
                error = %err,
                "failed to requeue the command"
            );
        }
        return;
    }

    if outcome.is_all_done() || outcome.is_fatal() {
        if outcome.is_fatal() {
            report_fatal(&errors, &outcome, delivery.message_id());
        }
        info!(message_id = %delivery.message_id(), "sending the all done signal");
        if let Err(err) = completion.send(completion_pub).await {
            // Left unacked so the broker redelivers after its timeout.
            error!(
                message_id = %delivery.message_id(),
                error = %err,
                "failed to send to the completion queue"
            );
            return;
        }
    }

    info!(message_id = %delivery.message_id(), "successfully completed a command");
    ack(&delivery).await;
}

/// Publishes a fatal outcome to the error stream without holding up the
/// completion path. Failures at either step are logged and discarded: the
/// error stream is an observability channel, not a control channel.
fn report_fatal(errors: &Arc<dyn CommandQueue>, outcome: &Outcome, message_id: &str) {
    match errors.create_message(outcome) {
        Ok(message) => {
            let errors = Arc::clone(errors);
            let message_id = message_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = errors.send(message).await {
                    error!(
                        message_id = %message_id,
                        error = %err,
                        "an error occurred while reporting an error"
                    );
                }
            });
        }
        Err(err) => {
            error!(
                message_id = %message_id,
                error = %err,
                "an error occurred while encoding an error report"
            );
        }
    }
}

async fn ack(delivery: &Delivery) {
    if let Err(err) = delivery.ack().await {
        // The broker will redeliver; the handler's side effects already
        // happened, which is the at-least-once tradeoff.
        warn!(
            message_id = %delivery.message_id(),
            error = %err,
            "failed to acknowledge the delivery"
        );
    }
}
