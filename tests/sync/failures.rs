//! Failure Handling Tests
//!
//! Record and document failures are counted and the run goes on; only
//! failures of the run state itself end a run.

use crate::common::*;
use std::sync::Arc;

fn untitled_post(id: RecordId) -> ContentRecord {
    ContentRecord::new(id, "post").with_status("publish")
}

#[test]
fn mapping_errors_are_counted_and_skipped() {
    let t = TestSync::new();
    t.posts(&t.tenant, [1, 2, 4, 5, 6, 8, 9, 10]);
    t.content.insert(&t.tenant, "posts", untitled_post(3));
    t.content.insert(&t.tenant, "posts", untitled_post(7));

    let exit = t.start(TriggerSource::Cli).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });

    let status = t.status();
    assert_eq!(status.per_index_counts.get("post"), Some(&8));
    assert_eq!(status.failed_count, 2);
    assert_eq!(t.post_ids(&t.tenant), vec![1, 2, 4, 5, 6, 8, 9, 10]);
}

#[test]
fn unpublished_posts_are_skipped_not_failed() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=3);
    t.content.insert(
        &t.tenant,
        "posts",
        ContentRecord::new(4, "post")
            .with_status("draft")
            .with_field("title", "Draft"),
    );

    let exit = t.start(TriggerSource::Cli).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 4 });
    assert_eq!(t.status().failed_count, 0);
    assert_eq!(t.post_ids(&t.tenant), vec![1, 2, 3]);
}

#[test]
fn rejected_documents_are_counted() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    t.backend.reject(5);

    let exit = t.start(TriggerSource::Dashboard).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });

    let status = t.status();
    assert_eq!(status.per_index_counts.get("post"), Some(&9));
    assert_eq!(status.failed_count, 1);
    assert!(!t.post_ids(&t.tenant).contains(&5));
}

#[test]
fn transient_backend_failures_are_retried() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    t.backend.fail_transiently(2);

    let exit = t.start(TriggerSource::Cli).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
    assert_eq!(t.status().failed_count, 0);
    assert_eq!(t.post_ids(&t.tenant).len(), 10);
    // Two failed attempts plus the three batches
    assert_eq!(t.backend.calls(), 5);
}

#[test]
fn exhausted_retries_fail_the_batch_not_the_run() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    // test_config allows 3 attempts
    t.backend.fail_transiently(3);

    let exit = t.start(TriggerSource::Cli).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });

    let status = t.status();
    assert_eq!(status.per_index_counts.get("post"), Some(&6));
    assert_eq!(status.failed_count, 4);
    assert_eq!(t.post_ids(&t.tenant), (5..=10).collect::<Vec<_>>());
}

#[test]
fn checkpoint_failure_fails_the_run_and_releases_the_lock() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    t.backend.close();
    let handle = t.start(TriggerSource::Cli);
    t.backend.wait_for_calls(1);

    t.store.fail_checkpoint_writes(true);
    t.backend.open();
    let exit = handle.wait().unwrap();
    let RunExit::Failed(message) = exit else {
        panic!("expected failure, got {:?}", exit);
    };
    assert!(message.contains("checkpoint"), "{}", message);

    let status = t.status();
    assert_eq!(status.status, SyncStatus::Failed);
    assert!(status.message().starts_with("Sync failed"));

    // Lock released: any trigger may start again
    t.store.fail_checkpoint_writes(false);
    let exit = t.start(TriggerSource::Dashboard).wait().unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
}

#[test]
fn failed_run_can_be_resumed_from_its_checkpoint() {
    let t = TestSync::new();
    t.posts(&t.tenant, 1..=10);
    t.backend.close();
    let handle = t.start(TriggerSource::Cli);
    // First batch checkpointed, second one in flight
    t.backend.allow(1);
    t.backend.wait_for_calls(2);

    t.store.fail_checkpoint_writes(true);
    t.backend.open();
    assert!(matches!(handle.wait().unwrap(), RunExit::Failed(_)));
    t.store.fail_checkpoint_writes(false);

    let calls_before = t.backend.calls();
    let exit = t
        .sync
        .start(&t.tenant, TriggerSource::Cli, &SyncOptions::new().resume(true))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 10 });
    // Batch 5..=8 is redone (its checkpoint was lost), then 9..=10
    assert_eq!(t.backend.calls() - calls_before, 2);
    assert_eq!(t.status().per_index_counts.get("post"), Some(&10));
}

#[test]
fn unreadable_content_lines_are_counted_as_failures() {
    let dir = tempfile::tempdir().unwrap();
    let site = dir.path().join("1");
    std::fs::create_dir_all(&site).unwrap();
    let mut bytes = Vec::new();
    for id in [1, 3] {
        bytes.extend_from_slice(serde_json::to_string(&post(id)).unwrap().as_bytes());
        bytes.push(b'\n');
    }
    bytes.extend_from_slice(b"{\"id\": 2, \"kind\": \"post\", \"fields\": {\"title\": \"\xff\"}}\n");
    std::fs::write(site.join("posts.jsonl"), bytes).unwrap();

    let sync = IndexSync::builder()
        .config(test_config())
        .content(Arc::new(indexsync::JsonlContentStore::new(dir.path())))
        .backend(Arc::new(MemoryBackend::new()))
        .ephemeral()
        .unwrap();
    let tenant = TenantId::new("1");

    let exit = sync
        .start(&tenant, TriggerSource::Cli, &SyncOptions::new())
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(exit, RunExit::Completed { processed_count: 2 });

    let status = sync.status(&tenant).unwrap();
    assert_eq!(status.status, SyncStatus::Completed);
    assert_eq!(status.failed_count, 1);
    assert_eq!(status.per_index_counts.get("post"), Some(&2));
}
