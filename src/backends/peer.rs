//! Boundary to the peer-sync service.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backends::result::CommandResult;
use crate::engine::types::ReturnValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageAvailability {
    Available,
    Unavailable,
    Unknown,
}

/// Status of the storage path the peer-sync service uses for a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePathStatus {
    pub folder_id: String,
    pub state: StorageAvailability,
    pub available_space: u64,
    pub path: String,
}

impl StoragePathStatus {
    /// Only an available path counts as success.
    pub fn into_command_result(self) -> CommandResult {
        let mut values = ReturnValues::new();
        values.insert("folder_id".to_string(), self.folder_id.clone().into());
        values.insert(
            "state".to_string(),
            serde_json::to_value(self.state).unwrap_or_default(),
        );
        values.insert(
            "available_space".to_string(),
            self.available_space.to_string().into(),
        );
        values.insert("path".to_string(), self.path.clone().into());

        if self.state == StorageAvailability::Available {
            CommandResult::succeeded("", values)
        } else {
            let mut result = CommandResult::failed(
                0,
                format!(
                    "Storage path '{}' for folder '{}' is not available",
                    self.path, self.folder_id
                ),
            );
            result.reported = values;
            result
        }
    }
}

#[async_trait]
pub trait PeerSyncBackend: Send + Sync {
    async fn storage_status(&self, folder_id: &str) -> Result<StoragePathStatus>;
}
