//! Scheduler behavior: overlap skip, crash-safe resume, graceful shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use common::{build_harness, default_agent};
use hypermind::application::scheduler::Scheduler;
use hypermind::domain::types::CycleStatus;

#[tokio::test]
async fn long_cycle_skips_the_next_tick_instead_of_queueing() {
    let h = build_harness("overlap-skip").await;
    h.agents.upsert(&default_agent()).await.unwrap();
    // Every model call stalls ~1.3s while the tick period is 500ms, so at
    // least one tick must fire mid-cycle and be dropped.
    h.model.set_delay(Duration::from_millis(1300)).await;

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&h.runner),
        Arc::clone(&h.bot_state),
        h.metrics.clone(),
        Duration::from_millis(500),
        Duration::from_secs(5),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(2200)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert!(h.metrics.ticks_skipped_total.get() >= 1.0);

    // Cycles ran strictly one at a time: with ~1.3s cycles inside ~2.2s plus
    // drain, only a couple can have completed.
    let state = h.bot_state.load().await.unwrap().unwrap();
    assert!(state.cycle_count >= 1);
    assert!(state.cycle_count <= 3);
    assert_eq!(state.last_cycle_status, Some(CycleStatus::Ok));

    // No duplicate decisions for any completed cycle.
    for cycle_id in 1..=state.cycle_count {
        assert!(h.decisions.count_for_cycle(cycle_id).await.unwrap() <= 1);
    }
}

#[tokio::test]
async fn restart_adopts_cycle_count_without_replaying() {
    let h = build_harness("crash-recovery").await;
    h.agents.upsert(&default_agent()).await.unwrap();

    // First run: a few fast cycles, then stop.
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&h.runner),
        Arc::clone(&h.bot_state),
        h.metrics.clone(),
        Duration::from_millis(200),
        Duration::from_secs(5),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };
    tokio::time::sleep(Duration::from_millis(900)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let count_before = h.bot_state.load().await.unwrap().unwrap().cycle_count;
    assert!(count_before >= 2);

    // "Restart": a fresh scheduler over the same database. The stored count
    // is adopted; the first new cycle is count_before + 1 — cycles 1..=N are
    // never replayed.
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&h.runner),
        Arc::clone(&h.bot_state),
        h.metrics.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    ));
    assert_eq!(scheduler.cycle_count(), 0); // not yet loaded

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };
    // The immediate first tick runs exactly one cycle; the next is 60s out.
    tokio::time::sleep(Duration::from_millis(800)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let state = h.bot_state.load().await.unwrap().unwrap();
    assert_eq!(state.cycle_count, count_before + 1);
    assert_eq!(scheduler.cycle_count(), count_before + 1);

    // cycle_count never decreased, and earlier cycles kept exactly one
    // decision each.
    for cycle_id in 1..=count_before {
        assert_eq!(h.decisions.count_for_cycle(cycle_id).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn shutdown_waits_for_the_inflight_cycle() {
    let h = build_harness("graceful-shutdown").await;
    h.agents.upsert(&default_agent()).await.unwrap();
    h.model.set_delay(Duration::from_millis(800)).await;

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&h.runner),
        Arc::clone(&h.bot_state),
        h.metrics.clone(),
        Duration::from_secs(30),
        Duration::from_secs(5),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    // Stop while the first (immediate) cycle is still inside its model call.
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    // The in-flight cycle was allowed to finalize, not abandoned.
    let state = h.bot_state.load().await.unwrap().unwrap();
    assert_eq!(state.cycle_count, 1);
    assert_eq!(state.last_cycle_status, Some(CycleStatus::Ok));
    assert_eq!(h.decisions.count_for_cycle(1).await.unwrap(), 1);
}
