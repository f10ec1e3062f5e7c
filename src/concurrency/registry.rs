use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use crate::concurrency::folder::FolderConcurrency;
use crate::error::{ValidationError, check_identifier};

/// All folders registered for synchronization, each with its own lock table.
///
/// Share one registry (behind an `Arc`) between every executor and detector
/// in the process so file locks hold across unrelated flow runs.
#[derive(Debug, Default)]
pub struct FolderRegistry {
    folders: RwLock<HashMap<String, FolderConcurrency>>,
}

impl FolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, folder_id: &str) -> Result<FolderConcurrency, ValidationError> {
        check_identifier("folder", folder_id)?;
        let mut folders = self.folders.write().unwrap_or_else(|e| e.into_inner());
        if folders.contains_key(folder_id) {
            return Err(ValidationError::FolderAlreadyRegistered {
                folder_id: folder_id.to_string(),
            });
        }
        let folder = FolderConcurrency::new(folder_id);
        folders.insert(folder_id.to_string(), folder.clone());
        info!(folder = %folder_id, "Folder registered");
        Ok(folder)
    }

    /// Return the folder's controller, registering it first if needed.
    pub fn get_or_register(&self, folder_id: &str) -> Result<FolderConcurrency, ValidationError> {
        match self.get(folder_id) {
            Ok(folder) => Ok(folder),
            Err(ValidationError::UnknownFolder { .. }) => match self.register(folder_id) {
                Err(ValidationError::FolderAlreadyRegistered { .. }) => self.get(folder_id),
                other => other,
            },
            Err(e) => Err(e),
        }
    }

    /// Remove a folder. Locks still held through outstanding guards are
    /// released when those guards drop.
    pub fn unregister(&self, folder_id: &str) -> Option<FolderConcurrency> {
        let removed = self
            .folders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(folder_id);
        if removed.is_some() {
            info!(folder = %folder_id, "Folder unregistered");
        }
        removed
    }

    pub fn get(&self, folder_id: &str) -> Result<FolderConcurrency, ValidationError> {
        check_identifier("folder", folder_id)?;
        self.folders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(folder_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownFolder {
                folder_id: folder_id.to_string(),
            })
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .folders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
