//! Boundary to the content-addressed backup tool.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backends::result::CommandResult;
use crate::engine::types::ReturnValues;

/// Operations the snapshot node can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum SnapshotCommand {
    Init,
    Backup {
        paths: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    Stats,
}

impl SnapshotCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SnapshotCommand::Init => "init",
            SnapshotCommand::Backup { .. } => "backup",
            SnapshotCommand::Stats => "stats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerParams {
    pub min_size: u64,
    pub max_size: u64,
    pub polynomial: String,
}

/// Repository description returned by `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: String,
    pub version: u32,
    pub chunker: ChunkerParams,
}

impl RepositoryInfo {
    pub fn to_return_values(&self) -> ReturnValues {
        let mut values = ReturnValues::new();
        values.insert("repository_id".to_string(), self.id.clone().into());
        values.insert("repository_version".to_string(), self.version.into());
        values.insert(
            "chunker_min_size".to_string(),
            self.chunker.min_size.to_string().into(),
        );
        values.insert(
            "chunker_max_size".to_string(),
            self.chunker.max_size.to_string().into(),
        );
        values.insert(
            "chunker_polynomial".to_string(),
            self.chunker.polynomial.clone().into(),
        );
        values
    }
}

/// Aggregate repository statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub total_size: u64,
    pub total_uncompressed_size: u64,
    pub total_file_count: u64,
    pub total_blob_count: u64,
    pub snapshots_count: u64,
    pub compression_ratio: f64,
    pub compression_space_saving: f64,
}

impl SnapshotStats {
    /// Counters are rendered as decimal strings so consumers that parse JSON
    /// numbers as doubles keep every digit.
    pub fn to_return_values(&self) -> ReturnValues {
        let mut values = ReturnValues::new();
        for (key, n) in [
            ("total_size", self.total_size),
            ("total_uncompressed_size", self.total_uncompressed_size),
            ("total_file_count", self.total_file_count),
            ("total_blob_count", self.total_blob_count),
            ("snapshots_count", self.snapshots_count),
        ] {
            values.insert(key.to_string(), n.to_string().into());
        }
        values.insert("compression_ratio".to_string(), self.compression_ratio.into());
        values.insert(
            "compression_space_saving".to_string(),
            self.compression_space_saving.into(),
        );
        values
    }
}

#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Run one command against `repository`. Tool failures come back in the
    /// `CommandResult`; `Err` means the invocation never completed.
    async fn run(&self, repository: &str, command: &SnapshotCommand) -> Result<CommandResult>;
}
