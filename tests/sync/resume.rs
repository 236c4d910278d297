//! Pause / Resume Tests
//!
//! A paused run continues from its checkpoint and ends up exactly where an
//! uninterrupted run would.

use crate::common::*;
use chrono::Utc;
use indexsync_core::{Checkpoint, RunId, RunLock, Stage};
use indexsync_engine::{CheckpointStore, RUN_LOCK_KEY};
use indexsync_storage::StateCell;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn pause_stops_at_the_next_batch_boundary() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);

    let handle = t.start_paused_after_first_batch(TriggerSource::Cli);
    assert_eq!(handle.wait().unwrap(), RunExit::Paused);

    let status = t.status();
    assert_eq!(status.status, SyncStatus::Paused);
    assert_eq!(status.processed_count, 4);
    assert_eq!(status.message(), SYNC_PAUSED);
    assert_eq!(t.post_ids(&t.tenant), vec![1, 2, 3, 4]);
}

#[test]
fn resumed_run_matches_an_uninterrupted_one() {
    let straight = TestSync::new();
    straight.posts(&straight.tenant, 1..=10);
    straight.users(&straight.tenant, 1..=3);
    straight.start(TriggerSource::Cli).wait().unwrap();
    let expected = straight.status();

    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    t.users(&t.tenant, 1..=3);
    let handle = t.start_paused_after_first_batch(TriggerSource::Cli);
    let run_id = handle.run_id();
    assert_eq!(handle.wait().unwrap(), RunExit::Paused);

    let resumed = t.sync.resume(&t.tenant, TriggerSource::Cli).unwrap();
    assert_eq!(resumed.run_id(), run_id);
    assert_eq!(resumed.wait().unwrap(), RunExit::Completed { processed_count: 13 });

    let status = t.status();
    assert_eq!(status.processed_count, expected.processed_count);
    assert_eq!(status.per_index_counts, expected.per_index_counts);
    assert_eq!(status.failed_count, expected.failed_count);
    assert_eq!(t.post_ids(&t.tenant), straight.post_ids(&straight.tenant));
    assert_eq!(t.user_ids(&t.tenant), straight.user_ids(&straight.tenant));
}

#[test]
fn resume_does_not_reprocess_finished_batches() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    let handle = t.start_paused_after_first_batch(TriggerSource::Dashboard);
    handle.wait().unwrap();
    let calls_before = t.backend.calls();

    t.sync
        .resume(&t.tenant, TriggerSource::Dashboard)
        .unwrap()
        .wait()
        .unwrap();

    // Remaining batches of 4 and 2 only
    assert_eq!(t.backend.calls() - calls_before, 2);
}

#[test]
fn start_with_resume_flag_continues_a_paused_run() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    let handle = t.start_paused_after_first_batch(TriggerSource::Cli);
    let run_id = handle.run_id();
    handle.wait().unwrap();

    let resumed = t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new().resume(true))
        .unwrap();
    assert_eq!(resumed.run_id(), run_id);
    assert_eq!(resumed.wait().unwrap(), RunExit::Completed { processed_count: 10 });
}

#[test]
fn paused_run_blocks_fresh_starts() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    t.start_paused_after_first_batch(TriggerSource::Cli).wait().unwrap();

    let err = t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new())
        .unwrap_err();
    assert!(err.is_busy());
}

#[test]
fn only_the_owning_trigger_resumes() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    t.start_paused_after_first_batch(TriggerSource::Dashboard)
        .wait()
        .unwrap();

    assert!(t.sync.resume(&t.tenant, TriggerSource::Cli).unwrap_err().is_busy());
    assert!(t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new().resume(true))
        .unwrap_err()
        .is_busy());
    assert_eq!(t.status().status, SyncStatus::Paused);

    let exit = t
        .sync
        .resume(&t.tenant, TriggerSource::Dashboard)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
}

#[test]
fn pause_and_resume_need_the_right_status() {
    let t = TestSync::new();
    assert!(matches!(t.sync.pause(&t.tenant), Err(Error::InvalidTransition(_))));
    assert!(matches!(
        t.sync.resume(&t.tenant, TriggerSource::Cli),
        Err(Error::InvalidTransition(_))
    ));

    t.posts(&t.tenant, 1..=10);
    t.start_paused_after_first_batch(TriggerSource::Cli).wait().unwrap();
    assert!(matches!(t.sync.pause(&t.tenant), Err(Error::InvalidTransition(_))));
}

#[test]
fn pause_from_another_process_reaches_the_worker() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    let peer = t.peer();

    t.backend.close();
    let handle = t.start(TriggerSource::Cli);
    t.backend.wait_for_calls(1);
    peer.pause(&t.tenant).unwrap();
    t.backend.open();
    assert_eq!(handle.wait().unwrap(), RunExit::Paused);

    // The peer drives the rest of the run
    let exit = peer
        .resume(&t.tenant, TriggerSource::Cli)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
    assert_eq!(t.post_ids(&t.tenant).len(), 10);
}

#[test]
fn resume_while_a_batch_is_in_flight_supersedes_the_old_worker() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);

    t.backend.close();
    let first = t.start(TriggerSource::Cli);
    t.backend.wait_for_calls(1);
    t.sync.pause(&t.tenant).unwrap();

    // The first worker still holds its batch when the second one starts
    let second = t.sync.resume(&t.tenant, TriggerSource::Cli).unwrap();
    assert_eq!(second.run_id(), first.run_id());
    t.backend.wait_for_calls(2);
    t.backend.open();

    let exits = vec![first.wait().unwrap(), second.wait().unwrap()];
    assert!(exits.contains(&RunExit::Superseded));
    assert!(exits.contains(&RunExit::Completed { processed_count: 10 }));

    let status = t.status();
    assert_eq!(status.status, SyncStatus::Completed);
    assert_eq!(status.processed_count, 10);
    assert_eq!(status.per_index_counts.get("post"), Some(&10));
    assert_eq!(t.post_ids(&t.tenant).len(), 10);
}

// ============================================================================
// Crash Recovery
// ============================================================================

/// Leave the state a crashed process would: lock held with its last
/// heartbeat `heartbeat_age` ago, checkpoint after the first batch, no worker
fn crashed_after_first_batch(t: &TestSync, trigger: TriggerSource, heartbeat_age: chrono::Duration) {
    let store: Arc<dyn StateStore> = t.store.clone();
    let run_id = RunId::new();
    let lock = RunLock::acquired(trigger, run_id, false, Utc::now() - heartbeat_age);
    StateCell::<RunLock>::new(Arc::clone(&store), RUN_LOCK_KEY)
        .init(&t.tenant, &lock)
        .unwrap();

    let plan = vec![Stage::new(t.tenant.clone(), "post"), Stage::new(t.tenant.clone(), "user")];
    let mut cp = Checkpoint::new(run_id, plan, 10);
    cp.processed_count = 4;
    cp.last_processed_id = Some(4);
    cp.add_indexed("post", 4);
    CheckpointStore::new(store).reset(&t.tenant, &cp).unwrap();
}

fn an_hour() -> chrono::Duration {
    chrono::Duration::hours(1)
}

#[test]
fn stale_lock_is_taken_over_and_run_continues() {
    let t = TestSync::with_config(SyncConfig {
        stale_lock_after_secs: Some(1),
        ..test_config()
    });
    t.posts(&t.tenant, 1..=10);
    crashed_after_first_batch(&t, TriggerSource::Dashboard, chrono::Duration::zero());

    // Fresh heartbeat: still considered running
    assert!(t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new().resume(true))
        .unwrap_err()
        .is_busy());

    std::thread::sleep(Duration::from_millis(1100));
    let exit = t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new().resume(true))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });

    // Only what the crashed worker had not checkpointed was indexed here
    assert_eq!(t.post_ids(&t.tenant), (5..=10).collect::<Vec<_>>());
    assert_eq!(t.status().per_index_counts.get("post"), Some(&10));
}

#[test]
fn stale_lock_needs_the_resume_flag() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    crashed_after_first_batch(&t, TriggerSource::Cli, an_hour());

    assert!(t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new())
        .unwrap_err()
        .is_busy());
}

#[test]
fn crashed_worker_is_recovered_with_default_config() {
    let t = TestSync::with_config(SyncConfig::default());
    t.posts(&t.tenant, 1..=10);
    crashed_after_first_batch(&t, TriggerSource::Cli, an_hour());

    let exit = t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new().resume(true))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
    assert_eq!(t.post_ids(&t.tenant), (5..=10).collect::<Vec<_>>());
}

#[test]
fn resume_takes_over_a_crashed_worker() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    crashed_after_first_batch(&t, TriggerSource::Dashboard, an_hour());

    let exit = t
        .sync
        .resume(&t.tenant, TriggerSource::Cli)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
    assert_eq!(t.status().per_index_counts.get("post"), Some(&10));
}

#[test]
fn crashed_worker_can_be_cancelled_outright() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    crashed_after_first_batch(&t, TriggerSource::Cli, an_hour());

    assert_eq!(t.sync.cancel(&t.tenant).unwrap().status, SyncStatus::Cancelled);

    // Nothing left holds the tenant
    assert!(t.sync.delete_index(&t.tenant, false).is_ok());
    let exit = t.start(TriggerSource::Dashboard).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
}

#[test]
fn cancel_left_behind_by_a_crashed_worker_is_released() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    crashed_after_first_batch(&t, TriggerSource::Cli, chrono::Duration::zero());
    // Deferred: the worker is presumed alive
    assert_eq!(t.sync.cancel(&t.tenant).unwrap().status, SyncStatus::Cancelling);

    let store: Arc<dyn StateStore> = t.store.clone();
    let cell = StateCell::<RunLock>::new(store, RUN_LOCK_KEY);
    let stored = cell.read(&t.tenant).unwrap().unwrap();
    let mut lock = stored.value;
    lock.heartbeat_at = Some(Utc::now() - an_hour());
    cell.cas(&t.tenant, stored.version, &lock).unwrap();

    assert_eq!(t.sync.cancel(&t.tenant).unwrap().status, SyncStatus::Cancelled);
    assert!(t.start(TriggerSource::Cli).wait().is_ok());
}

#[test]
fn live_heartbeat_is_not_taken_over() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    crashed_after_first_batch(&t, TriggerSource::Cli, chrono::Duration::zero());

    assert!(t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new().resume(true))
        .unwrap_err()
        .is_busy());
    assert!(matches!(
        t.sync.resume(&t.tenant, TriggerSource::Cli),
        Err(Error::InvalidTransition(_))
    ));
}
