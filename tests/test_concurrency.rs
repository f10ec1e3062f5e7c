//! Integration tests for per-folder file locks and the folder registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use syncflow::concurrency::{FolderConcurrency, FolderRegistry, LockError};
use syncflow::error::{ExecutionError, ValidationError};

#[tokio::test]
async fn second_acquire_waits_for_release() {
    let folder = FolderConcurrency::new("photos");
    let guard = folder.acquire("F1").await.unwrap();
    assert!(folder.is_locked("F1").unwrap());

    let contender = folder.clone();
    let waiter = tokio::spawn(async move { contender.acquire("F1").await.map(|g| g.file_id().to_string()) });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    drop(guard);
    let acquired = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(acquired, "F1");
}

#[tokio::test]
async fn different_files_do_not_block() {
    let folder = FolderConcurrency::new("photos");
    let _a = folder.acquire("a.jpg").await.unwrap();
    let b = folder.try_acquire("b.jpg").unwrap();
    assert!(b.is_some());
    assert!(folder.try_acquire("a.jpg").unwrap().is_none());

    let mut locked = folder.locked_files();
    locked.sort();
    assert_eq!(locked, vec!["a.jpg", "b.jpg"]);
}

#[tokio::test]
async fn acquire_timeout_reports_contention() {
    let folder = FolderConcurrency::new("photos");
    let _held = folder.acquire("F1").await.unwrap();

    let err = folder
        .acquire_timeout("F1", Duration::from_millis(40))
        .await
        .unwrap_err();

    match err {
        LockError::Timeout(ExecutionError::LockTimeout {
            folder_id, file_id, ..
        }) => {
            assert_eq!(folder_id, "photos");
            assert_eq!(file_id, "F1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn invalid_file_id_rejected() {
    let folder = FolderConcurrency::new("photos");

    assert!(matches!(
        folder.try_acquire(""),
        Err(ValidationError::InvalidIdentifier { .. })
    ));
    assert!(matches!(
        folder.acquire_timeout("   ", Duration::from_millis(10)).await,
        Err(LockError::Invalid(_))
    ));
}

#[tokio::test]
async fn release_of_unheld_file_is_harmless() {
    let folder = FolderConcurrency::new("photos");
    folder.release("never-locked");
    assert!(folder.locked_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutual_exclusion_under_contention() {
    let folder = FolderConcurrency::new("photos");
    let inside = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let folder = folder.clone();
        let inside = inside.clone();
        let violations = violations.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                let _guard = folder.acquire("F1").await.unwrap();
                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert!(!folder.is_locked("F1").unwrap());
}

#[test]
fn full_scan_flag_clears_on_drop() {
    let folder = FolderConcurrency::new("photos");
    {
        let _scan = folder.begin_full_scan().unwrap();
        assert!(folder.is_full_scan());
        assert!(folder.begin_full_scan().is_none());
    }
    assert!(!folder.is_full_scan());
}

// --- Registry ---

#[test]
fn registry_register_and_lookup() {
    let registry = FolderRegistry::new();
    registry.register("photos").unwrap();
    registry.register("music").unwrap();

    assert_eq!(registry.get("photos").unwrap().folder_id(), "photos");
    assert_eq!(registry.list(), vec!["music", "photos"]);

    assert!(matches!(
        registry.register("photos"),
        Err(ValidationError::FolderAlreadyRegistered { .. })
    ));
    assert!(matches!(
        registry.get("video"),
        Err(ValidationError::UnknownFolder { .. })
    ));
}

#[test]
fn registry_shares_lock_state() {
    let registry = FolderRegistry::new();
    let first = registry.get_or_register("photos").unwrap();
    let second = registry.get_or_register("photos").unwrap();

    let _guard = first.try_acquire("F1").unwrap().unwrap();
    assert!(second.is_locked("F1").unwrap());

    assert!(registry.unregister("photos").is_some());
    assert!(registry.unregister("photos").is_none());
    assert!(registry.register("").is_err());
}
