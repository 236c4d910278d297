//! File Store Tests
//!
//! Every `FileStore` handle opened on the same directory behaves like a
//! separate process sharing the store.

use crate::common::*;
use indexsync_storage::{DurabilityMode, FileStore, FileStoreOptions, StateCell, Transition};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn handle(dir: &TempDir) -> FileStore {
    FileStore::open_with(
        dir.path(),
        FileStoreOptions {
            durability: DurabilityMode::Buffered,
            ..FileStoreOptions::default()
        },
    )
    .unwrap()
}

fn tenant() -> TenantId {
    TenantId::new("7")
}

// ============================================================================
// Compare-and-swap across handles
// ============================================================================

#[test]
fn cas_conflicts_across_handles() {
    let dir = TempDir::new().unwrap();
    let a = handle(&dir);
    let b = handle(&dir);

    let v1 = a
        .compare_and_swap(&tenant(), "run_lock", None, Some(b"a".to_vec()))
        .unwrap()
        .unwrap();

    // b read nothing earlier; its create must lose
    let err = b
        .compare_and_swap(&tenant(), "run_lock", None, Some(b"b".to_vec()))
        .unwrap_err();
    assert!(err.is_conflict());

    // With the current version it wins
    let v2 = b
        .compare_and_swap(&tenant(), "run_lock", Some(v1), Some(b"b".to_vec()))
        .unwrap()
        .unwrap();
    assert_eq!(v2, v1.next());

    let seen = a.get(&tenant(), "run_lock").unwrap().unwrap();
    assert_eq!(seen.value, b"b".to_vec());
    assert_eq!(seen.version, v2);

    // a's stale version is refused
    assert!(a
        .compare_and_swap(&tenant(), "run_lock", Some(v1), None)
        .unwrap_err()
        .is_conflict());
}

#[test]
fn versions_are_not_reused_after_delete_and_reopen() {
    let dir = TempDir::new().unwrap();
    let v_before_delete = {
        let store = handle(&dir);
        let v1 = store
            .compare_and_swap(&tenant(), "checkpoint", None, Some(b"1".to_vec()))
            .unwrap()
            .unwrap();
        let v2 = store
            .compare_and_swap(&tenant(), "checkpoint", Some(v1), Some(b"2".to_vec()))
            .unwrap()
            .unwrap();
        store
            .compare_and_swap(&tenant(), "checkpoint", Some(v2), None)
            .unwrap();
        v2
    };

    let store = handle(&dir);
    assert!(store.get(&tenant(), "checkpoint").unwrap().is_none());
    let recreated = store
        .compare_and_swap(&tenant(), "checkpoint", None, Some(b"3".to_vec()))
        .unwrap()
        .unwrap();
    assert!(recreated > v_before_delete);

    // A writer still holding the old version cannot clobber the new record
    assert!(store
        .compare_and_swap(&tenant(), "checkpoint", Some(v_before_delete), Some(b"x".to_vec()))
        .unwrap_err()
        .is_conflict());
}

#[test]
fn tenants_are_listed_across_handles() {
    let dir = TempDir::new().unwrap();
    let a = handle(&dir);
    let b = handle(&dir);
    for t in ["3", "1", "2"] {
        a.compare_and_swap(&TenantId::new(t), "features", None, Some(b"[]".to_vec()))
            .unwrap();
    }
    assert_eq!(
        b.tenants().unwrap(),
        vec![TenantId::new("1"), TenantId::new("2"), TenantId::new("3")]
    );
}

#[test]
fn cell_transitions_from_two_handles_do_not_lose_updates() {
    const PER_THREAD: u64 = 25;

    let dir = TempDir::new().unwrap();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store: Arc<dyn StateStore> = Arc::new(handle(&dir));
            thread::spawn(move || {
                let cell: StateCell<u64> = StateCell::new(store, "counter");
                for _ in 0..PER_THREAD {
                    cell.transition(&tenant(), |current| -> StorageResult<_> {
                        Ok(Transition::Set(current.copied().unwrap_or(0) + 1, ()))
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let cell: StateCell<u64> = StateCell::new(Arc::new(handle(&dir)), "counter");
    let stored = cell.read(&tenant()).unwrap().unwrap();
    assert_eq!(stored.value, 2 * PER_THREAD);
    assert_eq!(stored.version, Version::new(2 * PER_THREAD));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever mix of writes and deletes, each successful CAS moves the
    /// version strictly forward and reads see the last write
    #[test]
    fn versions_only_move_forward(ops in prop::collection::vec(prop::option::of(0u8..=255), 1..24)) {
        let dir = TempDir::new().unwrap();
        let store = handle(&dir);
        let mut current: Option<Version> = None;
        let mut highest = Version::new(0);

        for op in ops {
            let value = op.map(|b| vec![b]);
            let deleting = value.is_none();
            let result = store.compare_and_swap(&tenant(), "cell", current, value.clone()).unwrap();
            match result {
                Some(v) => {
                    prop_assert!(v > highest);
                    highest = v;
                    current = Some(v);
                }
                None => {
                    prop_assert!(deleting);
                    current = None;
                }
            }
            let read = store.get(&tenant(), "cell").unwrap();
            prop_assert_eq!(read.map(|r| r.value), value);
        }
    }
}
