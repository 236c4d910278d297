//! Run Lifecycle Tests
//!
//! Complete runs from start to completion, and what every reader sees.

use crate::common::*;
use serde_json::Map;

// ============================================================================
// Complete Runs
// ============================================================================

#[test]
fn ten_records_in_batches_of_four_complete() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);

    let exit = t.start(TriggerSource::Cli).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });

    // Batches of 4, 4 and 2
    assert_eq!(t.backend.calls(), 3);
    assert_eq!(t.post_ids(&t.tenant), (1..=10).collect::<Vec<_>>());

    let status = t.status();
    assert_eq!(status.status, SyncStatus::Completed);
    assert_eq!(status.processed_count, 10);
    assert_eq!(status.total_items, 10);
    assert_eq!(status.per_index_counts.get("post"), Some(&10));
    assert_eq!(status.failed_count, 0);
    assert_eq!(status.message(), SYNC_COMPLETE);
    assert_eq!(status.current_index_name, None);
}

#[test]
fn empty_content_completes_immediately() {
    let t = TestSync::new();
    let exit = t.start(TriggerSource::Dashboard).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 0 });
    assert_eq!(t.backend.calls(), 0);
    assert_eq!(t.status().status, SyncStatus::Completed);
}

#[test]
fn posts_and_users_are_synced_in_order() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=5);
    t.users(&t.tenant, 1..=3);

    let exit = t.start(TriggerSource::Cli).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 8 });
    assert_eq!(t.post_ids(&t.tenant).len(), 5);
    assert_eq!(t.user_ids(&t.tenant), vec![1, 2, 3]);

    let status = t.status();
    assert_eq!(status.total_items, 8);
    assert_eq!(status.per_index_counts.get("post"), Some(&5));
    assert_eq!(status.per_index_counts.get("user"), Some(&3));
}

#[test]
fn progress_is_visible_between_batches() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    t.backend.close();
    let handle = t.start(TriggerSource::Dashboard);

    // Held in the first bulk call: nothing processed yet
    t.backend.wait_for_calls(1);
    let status = t.status();
    assert_eq!(status.status, SyncStatus::Running);
    assert_eq!(status.trigger, Some(TriggerSource::Dashboard));
    assert_eq!(status.processed_count, 0);
    assert_eq!(status.total_items, 10);
    assert_eq!(status.current_index_name.as_deref(), Some("post"));

    // The second call arrives only after the first batch is checkpointed
    t.backend.allow(1);
    t.backend.wait_for_calls(2);
    let status = t.status();
    assert_eq!(status.processed_count, 4);
    assert_eq!(status.message(), "Sync in progress: 4/10");
    assert!((status.fraction() - 0.4).abs() < f64::EPSILON);

    t.backend.open();
    assert_eq!(handle.wait().unwrap(), RunExit::Completed { processed_count: 10 });
}

#[test]
fn another_process_sees_progress_from_stored_state() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    let peer = t.peer();

    t.backend.close();
    let handle = t.start(TriggerSource::Cli);
    t.backend.allow(1);
    t.backend.wait_for_calls(2);

    let seen = peer.status(&t.tenant).unwrap();
    assert_eq!(seen.status, SyncStatus::Running);
    assert_eq!(seen.processed_count, 4);
    assert_eq!(seen.trigger, Some(TriggerSource::Cli));

    t.backend.open();
    handle.wait().unwrap();
    let seen = peer.status(&t.tenant).unwrap();
    assert_eq!(seen.status, SyncStatus::Completed);
    assert_eq!(seen.processed_count, 10);
}

// ============================================================================
// Re-runs and Options
// ============================================================================

#[test]
fn rerun_replaces_documents_without_duplicates() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);

    t.start(TriggerSource::Cli).wait().unwrap();
    let exit = t.start(TriggerSource::Dashboard).wait().unwrap();

    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
    assert_eq!(t.post_ids(&t.tenant), (1..=10).collect::<Vec<_>>());
    assert_eq!(t.status().per_index_counts.get("post"), Some(&10));
}

#[test]
fn setup_recreates_the_index() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=3);
    let stale = IndexDocument::new(99, "post", Map::new());
    t.backend.seed("indexsync-post-1", &[stale]);

    let options = SyncOptions::new().setup(true);
    t.sync
        .start(&t.tenant, TriggerSource::Cli, &options)
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(t.post_ids(&t.tenant), vec![1, 2, 3]);
}

#[test]
fn without_setup_existing_documents_stay() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=3);
    t.backend.seed("indexsync-post-1", &[IndexDocument::new(99, "post", Map::new())]);

    t.start(TriggerSource::Cli).wait().unwrap();
    assert_eq!(t.post_ids(&t.tenant), vec![1, 2, 3, 99]);
}

#[test]
fn selected_indices_only() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=5);
    t.users(&t.tenant, 1..=2);

    let options = SyncOptions::new().indices(IndexSelection::only(["user", "comment"]));
    let exit = t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &options)
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(exit, RunExit::Completed { processed_count: 2 });
    assert!(t.post_ids(&t.tenant).is_empty());
    assert_eq!(t.user_ids(&t.tenant), vec![1, 2]);
}

#[test]
fn disabled_feature_is_skipped_and_reported_in_health() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=3);
    t.users(&t.tenant, 1..=2);

    let enabled = t.sync.set_feature(&t.tenant, "user", false).unwrap();
    assert!(!enabled.contains("user"));

    let exit = t.start(TriggerSource::Cli).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 3 });

    let health = t.sync.health(&t.tenant).unwrap();
    let user = health.iter().find(|h| h.index_name == "user").unwrap();
    assert!(!user.enabled);
    assert_eq!(user.document_count, None);
    let post = health.iter().find(|h| h.index_name == "post").unwrap();
    assert_eq!(post.document_count, Some(3));
    assert_eq!(post.physical_name, "indexsync-post-1");
}

#[test]
fn unknown_feature_is_refused() {
    let t = TestSync::new();
    assert!(matches!(
        t.sync.set_feature(&t.tenant, "comment", true),
        Err(Error::Config(_))
    ));
}

#[test]
fn delete_index_removes_indices_and_checkpoint() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=3);
    t.start(TriggerSource::Cli).wait().unwrap();

    let deleted = t.sync.delete_index(&t.tenant, false).unwrap();
    assert_eq!(deleted, vec!["indexsync-post-1", "indexsync-user-1"]);
    assert!(t.post_ids(&t.tenant).is_empty());
    assert!(t
        .sync
        .health(&t.tenant)
        .unwrap()
        .iter()
        .all(|h| h.document_count.is_none()));
}
