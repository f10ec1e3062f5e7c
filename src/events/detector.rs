use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::concurrency::{FolderRegistry, LockError};
use crate::error::{SyncError, check_file_id};
use crate::events::chain::FileEventTracker;
use crate::events::checksum::md5_file;
use crate::events::types::{FileAttributes, FileEventDto, Observation};

/// Turns what is on disk into file events.
///
/// Observing a file holds that file's lock from the folder registry, so
/// hashing and recording never overlap a node operating on the same file.
#[derive(Clone)]
pub struct ChangeDetector {
    folders: Arc<FolderRegistry>,
    tracker: Arc<FileEventTracker>,
    lock_timeout: Duration,
}

impl ChangeDetector {
    pub fn new(folders: Arc<FolderRegistry>, tracker: Arc<FileEventTracker>) -> Self {
        Self {
            folders,
            tracker,
            lock_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn tracker(&self) -> &Arc<FileEventTracker> {
        &self.tracker
    }

    /// Look at one file under `root` and record whatever changed.
    pub async fn observe_file(
        &self,
        folder_id: &str,
        root: &Path,
        file_id: &str,
    ) -> Result<Option<FileEventDto>, SyncError> {
        check_file_id(file_id)?;
        let folder = self.folders.get(folder_id)?;
        let _guard = folder
            .acquire_timeout(file_id, self.lock_timeout)
            .await
            .map_err(|e| match e {
                LockError::Invalid(e) => SyncError::from(e),
                LockError::Timeout(e) => SyncError::from(e),
            })?;

        let observation = observe_path(&root.join(file_id)).await?;
        self.tracker.observe(folder_id, file_id, observation)
    }

    /// Walk the whole folder: record every present file, then record
    /// deletions for tracked files that are gone.
    ///
    /// The folder's full-scan flag is set for the duration. If a scan is
    /// already running, this returns no events.
    pub async fn scan_folder(
        &self,
        folder_id: &str,
        root: &Path,
    ) -> Result<Vec<FileEventDto>, SyncError> {
        let folder = self.folders.get(folder_id)?;
        let Some(_scan) = folder.begin_full_scan() else {
            info!(folder = %folder_id, "Full scan already in progress");
            return Ok(Vec::new());
        };

        info!(folder = %folder_id, root = %root.display(), "Starting full scan");

        let present = list_files(root).await.map_err(|source| SyncError::Io {
            path: root.display().to_string(),
            source,
        })?;

        let mut events = Vec::new();
        let mut pending: Vec<String> = present.clone();
        for file_id in self.tracker.live_files(folder_id) {
            if !present.contains(&file_id) {
                pending.push(file_id);
            }
        }

        for file_id in pending {
            match self.observe_file(folder_id, root, &file_id).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(SyncError::Execution(e)) => {
                    // Busy file: the next scan or change notification picks it up
                    warn!(folder = %folder_id, file_id = %file_id, error = %e, "Skipping locked file during scan");
                }
                Err(SyncError::EventChain(e)) => {
                    // Recreated after deletion: the old chain stays closed
                    warn!(folder = %folder_id, file_id = %file_id, error = %e, "Skipping file with closed event chain");
                }
                Err(e) => return Err(e),
            }
        }

        info!(folder = %folder_id, events = events.len(), "Full scan complete");
        Ok(events)
    }
}

/// Stat and hash a path. A missing path is an observation, not an error.
pub async fn observe_path(path: &Path) -> Result<Observation, SyncError> {
    let io_err = |source| SyncError::Io {
        path: path.display().to_string(),
        source,
    };

    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Observation::Absent),
        Err(e) => return Err(io_err(e)),
    };

    let attributes = FileAttributes::from_metadata(&meta);
    let md5 = if meta.is_file() {
        match md5_file(path).await {
            Ok(digest) => digest,
            // Deleted between stat and read
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Observation::Absent),
            Err(e) => return Err(io_err(e)),
        }
    } else {
        String::new()
    };

    Ok(Observation::Present { attributes, md5 })
}

/// Regular files under `root`, as `/`-separated paths relative to it, sorted.
pub async fn list_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut dirs: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                dirs.push(path);
            } else if file_type.is_file()
                && let Ok(relative) = path.strip_prefix(root)
            {
                let parts: Option<Vec<&str>> =
                    relative.components().map(|c| c.as_os_str().to_str()).collect();
                match parts {
                    Some(parts) => files.push(parts.join("/")),
                    None => warn!(path = %path.display(), "Skipping non-UTF-8 file name"),
                }
            }
        }
    }

    files.sort();
    Ok(files)
}
