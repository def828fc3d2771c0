//! Constructor validation, queue declaration, and the single-start guard.

use std::sync::Arc;

use crate::controller::CommandController;
use crate::error::DispatchError;
use crate::outcome::Outcome;
use crate::queue::CommandQueue;

use super::harness::{wait_until, RecordingQueue, Rig, ScriptedHandler};

#[tokio::test]
async fn rejects_zero_concurrency() {
    let cmds = RecordingQueue::new();
    let errors = RecordingQueue::new();
    let completion = RecordingQueue::new();

    let result = CommandController::new(
        0,
        Arc::clone(&cmds) as Arc<dyn CommandQueue>,
        Arc::clone(&errors) as Arc<dyn CommandQueue>,
        Arc::clone(&completion) as Arc<dyn CommandQueue>,
        ScriptedHandler::returning(Outcome::success()),
    )
    .await;

    assert!(matches!(result, Err(DispatchError::InvalidConcurrency(0))));
}

#[tokio::test]
async fn declares_commands_and_completion_queues() {
    let rig = Rig::with_outcome(Outcome::success()).await;

    assert_eq!(rig.cmds.create_queue_calls(), 1);
    assert_eq!(rig.completion.create_queue_calls(), 1);
    // The error stream is declared by its consumers, not by the worker.
    assert_eq!(rig.errors.create_queue_calls(), 0);
}

#[tokio::test]
async fn construction_survives_declare_failures() {
    let cmds = RecordingQueue::new();
    let errors = RecordingQueue::new();
    let completion = RecordingQueue::new();
    cmds.fail_create_queue();
    completion.fail_create_queue();

    let result = CommandController::new(
        2,
        Arc::clone(&cmds) as Arc<dyn CommandQueue>,
        Arc::clone(&errors) as Arc<dyn CommandQueue>,
        Arc::clone(&completion) as Arc<dyn CommandQueue>,
        ScriptedHandler::returning(Outcome::success()),
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(cmds.create_queue_calls(), 1);
    assert_eq!(completion.create_queue_calls(), 1);
}

#[tokio::test]
async fn start_runs_the_loop_exactly_once() {
    let rig = Rig::with_outcome(Outcome::success()).await;

    let first = rig.spawn_start();
    wait_until("the stream to be consumed", || rig.cmds.consume_calls() == 1).await;

    // Every later call is a no-op that returns immediately.
    rig.controller.start().await.expect("second start");
    rig.controller.start().await.expect("third start");
    assert_eq!(rig.cmds.consume_calls(), 1);

    rig.cmds.close();
    first.await.expect("join").expect("dispatch loop");
}

#[tokio::test]
async fn stream_closure_ends_the_loop_cleanly() {
    let rig = Rig::with_outcome(Outcome::success()).await;

    let running = rig.spawn_start();
    rig.push_deliveries(3).await;
    wait_until("all deliveries to be processed", || {
        rig.handler.processed() == 3
    })
    .await;

    rig.cmds.close();
    running.await.expect("join").expect("dispatch loop");
}

#[tokio::test]
async fn consume_failure_is_surfaced() {
    let rig = Rig::with_outcome(Outcome::success()).await;
    rig.cmds.fail_consume();

    let result = rig.controller.start().await;
    assert!(matches!(result, Err(DispatchError::Consume(_))));
}
