//! Integration tests for the command controller.
//!
//! Test organization:
//!
//! - `harness.rs`      - Recording mocks (queue, acker, scripted handler)
//! - `construction.rs` - Constructor validation, queue declaration, single start
//! - `ack.rs`          - Success path: ack-only, at-most-once
//! - `completion.rs`   - All-done path and completion send failure
//! - `requeue.rs`      - Non-fatal failures and explicit requeues
//! - `fatal.rs`        - Fatal path: error stream + completion + ack
//! - `trap.rs`         - Trap outcomes: swallow and ack
//! - `concurrency.rs`  - Bounded dispatch and permit discipline

mod concurrency;
mod construction;
