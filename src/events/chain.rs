use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use crate::error::{EventChainError, SyncError, check_file_id, check_identifier};
use crate::events::types::*;

/// Decide which event, if any, an observation produces given the latest
/// recorded event for the same file.
pub fn decide(
    latest: Option<&FileEventDto>,
    observation: &Observation,
) -> Result<Option<FileEventKind>, EventChainError> {
    match (latest, observation) {
        (None, Observation::Present { .. }) => Ok(Some(FileEventKind::Created)),
        (None, Observation::Absent) => Ok(None),
        (Some(prev), Observation::Absent) if prev.is_deletion() => Ok(None),
        (Some(prev), Observation::Present { .. }) if prev.is_deletion() => {
            Err(EventChainError::ChainClosed {
                folder_id: prev.folder_id.clone(),
                file_id: prev.file_id.clone(),
                closed_by: prev.file_event_id,
            })
        }
        (Some(_), Observation::Absent) => Ok(Some(FileEventKind::Deleted)),
        (Some(prev), Observation::Present { attributes, md5 }) => {
            if prev.file_md5_checksum != *md5 || prev.attributes != *attributes {
                Ok(Some(FileEventKind::Modified))
            } else {
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileKey {
    folder_id: String,
    file_id: String,
}

impl FileKey {
    fn new(folder_id: &str, file_id: &str) -> Self {
        Self {
            folder_id: folder_id.to_string(),
            file_id: file_id.to_string(),
        }
    }
}

/// Arena of every recorded event, indexed by id, with a latest-event index
/// per file.
#[derive(Debug, Default)]
pub struct EventChain {
    events: Vec<FileEventDto>,
    latest: HashMap<FileKey, FileEventId>,
}

impl EventChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an observation; returns the new event when one was emitted.
    pub fn record(
        &mut self,
        folder_id: &str,
        file_id: &str,
        observation: Observation,
    ) -> Result<Option<FileEventDto>, EventChainError> {
        let key = FileKey::new(folder_id, file_id);
        let latest = self.latest.get(&key).and_then(|&id| self.event(id));

        let Some(kind) = decide(latest, &observation)? else {
            return Ok(None);
        };

        let parent = latest.map(|e| e.file_event_id);
        let (attributes, checksum) = match observation {
            Observation::Present { attributes, md5 } => (attributes, md5),
            Observation::Absent => match latest {
                Some(prev) => (prev.attributes.clone(), prev.file_md5_checksum.clone()),
                // decide() never emits a deletion without a predecessor
                None => return Ok(None),
            },
        };

        let event = FileEventDto {
            file_event_id: self.events.len() as FileEventId + 1,
            parent_file_event_id: parent,
            folder_id: folder_id.to_string(),
            file_id: file_id.to_string(),
            kind,
            attributes,
            file_md5_checksum: checksum,
            detected_at: Utc::now(),
        };

        self.latest.insert(key, event.file_event_id);
        self.events.push(event.clone());
        Ok(Some(event))
    }

    pub fn event(&self, id: FileEventId) -> Option<&FileEventDto> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.events.get(index)
    }

    pub fn latest(&self, folder_id: &str, file_id: &str) -> Option<&FileEventDto> {
        self.latest
            .get(&FileKey::new(folder_id, file_id))
            .and_then(|&id| self.event(id))
    }

    /// History of one file, newest first, following parent links.
    pub fn history(&self, folder_id: &str, file_id: &str) -> Vec<&FileEventDto> {
        let mut chain = Vec::new();
        let mut cursor = self.latest(folder_id, file_id);
        while let Some(event) = cursor {
            chain.push(event);
            cursor = event.parent_file_event_id.and_then(|id| self.event(id));
        }
        chain
    }

    /// Files in a folder whose chain is still open (latest event is not a deletion).
    pub fn live_files(&self, folder_id: &str) -> Vec<String> {
        let mut files: Vec<String> = self
            .latest
            .iter()
            .filter(|(key, _)| key.folder_id == folder_id)
            .filter(|&(_, &id)| self.event(id).is_some_and(|e| !e.is_deletion()))
            .map(|(key, _)| key.file_id.clone())
            .collect();
        files.sort();
        files
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Thread-safe handle to an [`EventChain`]. Each `observe` runs as one
/// critical section, so emissions for a file can never interleave.
#[derive(Debug, Default)]
pub struct FileEventTracker {
    chain: Mutex<EventChain>,
}

impl FileEventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &self,
        folder_id: &str,
        file_id: &str,
        observation: Observation,
    ) -> Result<Option<FileEventDto>, SyncError> {
        check_identifier("folder", folder_id)?;
        check_file_id(file_id)?;

        let emitted = self.lock().record(folder_id, file_id, observation)?;
        if let Some(event) = &emitted {
            debug!(
                folder = %folder_id,
                file_id = %file_id,
                event_id = event.file_event_id,
                kind = %event.kind,
                "File event recorded"
            );
        }
        Ok(emitted)
    }

    pub fn latest(&self, folder_id: &str, file_id: &str) -> Option<FileEventDto> {
        self.lock().latest(folder_id, file_id).cloned()
    }

    pub fn history(&self, folder_id: &str, file_id: &str) -> Vec<FileEventDto> {
        self.lock()
            .history(folder_id, file_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn live_files(&self, folder_id: &str) -> Vec<String> {
        self.lock().live_files(folder_id)
    }

    pub fn event_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventChain> {
        // Events are appended after the index is updated in one step; a
        // panic elsewhere cannot leave the arena half-written.
        self.chain.lock().unwrap_or_else(|e| e.into_inner())
    }
}
