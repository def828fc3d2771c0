//! drover: bounded-concurrency command dispatch over a message broker.
//!
//! Drains deliveries from a commands queue, hands each to a
//! [`DeliveryHandler`], and routes the outcome: back to the commands queue
//! for another attempt, to the completion queue when a job is finished,
//! and onto a best-effort error stream for fatal failures.
//!
//! # Core Invariants
//!
//! 1. **At-Most-Once Ack**: each delivery is acknowledged at most once,
//!    and never on the requeue or failed-completion paths
//! 2. **Bounded Dispatch**: at most `max_concurrency` deliveries are in
//!    flight; admission blocks the consumer loop, pushing backpressure
//!    to the broker
//! 3. **Broker-Owned Retry**: every failure that leaves a delivery
//!    unacked relies on broker redelivery instead of in-process retries
//! 4. **Single Start**: the dispatch loop runs exactly once no matter how
//!    many times `start` is called
//!
//! # Architecture
//!
//! ```text
//! broker -> consume() -> dispatch loop -> handler -> Outcome
//!                                                      |
//!                       requeue | completion | errors <-+-> ack
//! ```

pub mod controller;
pub mod error;
pub mod handler;
pub mod outcome;
pub mod queue;

#[cfg(test)]
mod tests;

pub use controller::CommandController;
pub use error::{DispatchError, DispatchResult};
pub use handler::{DeliveryHandler, SinkHandler};
pub use outcome::{Outcome, OutcomeKind};
pub use queue::{Acker, CommandQueue, Delivery, Publishing, QueueError, QueueResult};
