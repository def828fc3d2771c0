//! Bounded dispatch: the semaphore caps in-flight handlers and every
//! permit is returned at task exit.

use std::time::Duration;

use crate::outcome::Outcome;

use super::harness::{wait_until, Rig, ScriptedHandler};

#[tokio::test]
async fn dispatch_never_exceeds_the_concurrency_bound() {
    let handler = ScriptedHandler::returning(Outcome::success());
    handler.set_delay(Duration::from_millis(50));

    let rig = Rig::build(2, handler).await;
    rig.spawn_start();

    rig.push_deliveries(10).await;
    wait_until("10 processed", || rig.handler.processed() == 10).await;

    assert_eq!(rig.handler.max_in_flight(), 2);
}

#[tokio::test]
async fn concurrency_of_one_serializes_dispatch() {
    let handler = ScriptedHandler::returning(Outcome::success());
    handler.set_delay(Duration::from_millis(10));

    let rig = Rig::build(1, handler).await;
    rig.spawn_start();

    rig.push_deliveries(5).await;
    wait_until("5 processed", || rig.handler.processed() == 5).await;

    assert_eq!(rig.handler.max_in_flight(), 1);
}

#[tokio::test]
async fn permits_are_returned_for_reuse() {
    let handler = ScriptedHandler::returning(Outcome::success());
    handler.set_delay(Duration::from_millis(5));

    let rig = Rig::build(2, handler).await;
    rig.spawn_start();

    // Two full waves through the two permits: if any exit path leaked a
    // permit, the second wave would stall and trip the deadline.
    rig.push_deliveries(10).await;
    wait_until("first wave", || rig.handler.processed() == 10).await;

    for i in 10..20 {
        rig.cmds
            .push(super::harness::delivery(&format!("{i}-0"), &rig.acker))
            .await;
    }
    wait_until("second wave", || rig.handler.processed() == 20).await;
    wait_until("20 acks", || rig.acker.ack_count() == 20).await;
}

#[tokio::test]
async fn unacked_paths_still_release_permits() {
    // Requeue failures leave deliveries unacked; the permits must come
    // back regardless, or the bound would choke the loop.
    let handler = ScriptedHandler::returning(Outcome::error("boom"));
    let rig = Rig::build(2, handler).await;
    rig.cmds.fail_requeue();
    rig.spawn_start();

    rig.push_deliveries(10).await;
    wait_until("10 requeue attempts", || rig.cmds.requeue_count() == 10).await;
    assert_eq!(rig.acker.ack_count(), 0);
}
