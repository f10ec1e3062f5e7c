//! Boundary to the mirroring/copy tool.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backends::result::CommandResult;
use crate::engine::types::ReturnValues;

/// A location understood by the copy tool: a configured remote (or local
/// filesystem, when empty) and a path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPair {
    #[serde(default)]
    pub remote: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRequest {
    pub source: PathPair,
    pub destination: PathPair,
    #[serde(default)]
    pub create_empty_dirs: bool,
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Statistics the copy tool reports for one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStat {
    pub name: String,
    pub size: u64,
    pub bytes: u64,
    /// The file was only compared, not copied.
    pub checked: bool,
    pub timestamp: DateTime<Utc>,
    pub job_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait MirrorBackend: Send + Sync {
    /// Copy `source` to `destination`. Tool-level failures are reported in
    /// the returned `CommandResult`; `Err` means the tool was never reached.
    async fn copy(&self, request: &CopyRequest) -> Result<CommandResult>;
}

/// Summarize per-transfer statistics into reported values.
pub fn transfer_summary(stats: &[TransferStat]) -> ReturnValues {
    let bytes: u64 = stats.iter().map(|s| s.bytes).sum();
    let copied = stats.iter().filter(|s| !s.checked && s.error.is_none()).count();
    let checked = stats.iter().filter(|s| s.checked).count();
    let errors: Vec<&str> = stats.iter().filter_map(|s| s.error.as_deref()).collect();

    let mut values = ReturnValues::new();
    values.insert("bytes_transferred".to_string(), bytes.to_string().into());
    values.insert("files_copied".to_string(), copied.into());
    values.insert("files_checked".to_string(), checked.into());
    values.insert("transfer_errors".to_string(), errors.into());
    values.insert(
        "transfers".to_string(),
        serde_json::to_value(stats).unwrap_or_default(),
    );
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(name: &str, bytes: u64, checked: bool, error: Option<&str>) -> TransferStat {
        TransferStat {
            name: name.to_string(),
            size: bytes,
            bytes,
            checked,
            timestamp: Utc::now(),
            job_id: 7,
            error: error.map(String::from),
        }
    }

    #[test]
    fn summary_counts_copies_checks_and_errors() {
        let values = transfer_summary(&[
            stat("a", 10, false, None),
            stat("b", 0, true, None),
            stat("c", 5, false, Some("permission denied")),
        ]);
        assert_eq!(values["bytes_transferred"], serde_json::json!("15"));
        assert_eq!(values["files_copied"], serde_json::json!(1));
        assert_eq!(values["files_checked"], serde_json::json!(1));
        assert_eq!(values["transfer_errors"], serde_json::json!(["permission denied"]));
    }
}
