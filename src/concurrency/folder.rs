use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::error::{ExecutionError, ValidationError, check_identifier};

/// Per-folder lock table: the set of file ids currently held plus the
/// advisory full-scan flag.
///
/// A file id is in the set exactly while some [`FileLockGuard`] for it is
/// alive. Cloning the controller shares the same state.
#[derive(Debug, Clone)]
pub struct FolderConcurrency {
    inner: Arc<FolderState>,
}

#[derive(Debug)]
struct FolderState {
    folder_id: String,
    /// File id -> token of the guard that holds it.
    locked: Mutex<HashMap<String, u64>>,
    next_token: AtomicU64,
    released: Notify,
    full_scan: AtomicBool,
}

impl FolderState {
    fn locked(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        // The map is only touched by single insert/remove/lookup calls, so a
        // poisoned lock still guards a consistent map.
        self.locked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, file_id: &str, token: Option<u64>) -> bool {
        let removed = {
            let mut locked = self.locked();
            let held = locked.get(file_id).copied();
            match (held, token) {
                (Some(held), Some(token)) if held != token => false,
                (Some(_), _) => locked.remove(file_id).is_some(),
                (None, _) => false,
            }
        };
        if removed {
            self.released.notify_waiters();
        }
        removed
    }
}

impl FolderConcurrency {
    pub fn new(folder_id: &str) -> Self {
        Self {
            inner: Arc::new(FolderState {
                folder_id: folder_id.to_string(),
                locked: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                released: Notify::new(),
                full_scan: AtomicBool::new(false),
            }),
        }
    }

    pub fn folder_id(&self) -> &str {
        &self.inner.folder_id
    }

    /// Take the lock if nobody holds it. `Ok(None)` means it is held elsewhere.
    pub fn try_acquire(&self, file_id: &str) -> Result<Option<FileLockGuard>, ValidationError> {
        check_identifier("file", file_id)?;
        Ok(self.insert_if_absent(file_id))
    }

    /// Wait until the file is free, then take its lock.
    pub async fn acquire(&self, file_id: &str) -> Result<FileLockGuard, ValidationError> {
        check_identifier("file", file_id)?;
        loop {
            // Register interest before checking so a release between the
            // check and the await is not lost.
            let released = self.inner.released.notified();
            if let Some(guard) = self.insert_if_absent(file_id) {
                return Ok(guard);
            }
            trace!(folder = %self.inner.folder_id, file_id, "Waiting for file lock");
            released.await;
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub async fn acquire_timeout(
        &self,
        file_id: &str,
        timeout: Duration,
    ) -> Result<FileLockGuard, LockError> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.acquire(file_id)).await {
            Ok(Ok(guard)) => Ok(guard),
            Ok(Err(e)) => Err(LockError::Invalid(e)),
            Err(_) => {
                debug!(folder = %self.inner.folder_id, file_id, "File lock wait timed out");
                Err(LockError::Timeout(ExecutionError::LockTimeout {
                    folder_id: self.inner.folder_id.clone(),
                    file_id: file_id.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                }))
            }
        }
    }

    /// Drop a lock by id. Releasing a file that is not locked does nothing.
    pub fn release(&self, file_id: &str) {
        if !self.inner.remove(file_id, None) {
            trace!(folder = %self.inner.folder_id, file_id, "Release of unlocked file ignored");
        }
    }

    pub fn is_locked(&self, file_id: &str) -> Result<bool, ValidationError> {
        check_identifier("file", file_id)?;
        Ok(self.inner.locked().contains_key(file_id))
    }

    /// Ids currently held, sorted.
    pub fn locked_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.inner.locked().keys().cloned().collect();
        files.sort();
        files
    }

    /// Mark a whole-folder scan as running until the returned guard drops.
    ///
    /// Returns `None` when another scan already holds the flag.
    pub fn begin_full_scan(&self) -> Option<FullScanGuard> {
        self.inner
            .full_scan
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FullScanGuard {
                inner: self.inner.clone(),
            })
    }

    /// Advisory: per-file triggers should hold off while this is set.
    pub fn is_full_scan(&self) -> bool {
        self.inner.full_scan.load(Ordering::Acquire)
    }

    fn insert_if_absent(&self, file_id: &str) -> Option<FileLockGuard> {
        let mut locked = self.inner.locked();
        if locked.contains_key(file_id) {
            return None;
        }
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        locked.insert(file_id.to_string(), token);
        Some(FileLockGuard {
            inner: self.inner.clone(),
            file_id: file_id.to_string(),
            token,
        })
    }
}

/// Why a bounded acquire did not produce a lock.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LockError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Timeout(ExecutionError),
}

/// Holds one file lock; dropping it releases the lock on every exit path.
#[derive(Debug)]
pub struct FileLockGuard {
    inner: Arc<FolderState>,
    file_id: String,
    token: u64,
}

impl FileLockGuard {
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn folder_id(&self) -> &str {
        &self.inner.folder_id
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // A no-op if the lock was force-released and re-taken by someone else.
        self.inner.remove(&self.file_id, Some(self.token));
    }
}

/// Clears the folder's full-scan flag when dropped.
#[derive(Debug)]
pub struct FullScanGuard {
    inner: Arc<FolderState>,
}

impl Drop for FullScanGuard {
    fn drop(&mut self) {
        self.inner.full_scan.store(false, Ordering::Release);
    }
}
