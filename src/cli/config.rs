use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::engine::ExecutorSettings;
use crate::engine::types::LockContentionPolicy;

/// Configuration loaded from `syncflow.yaml`.
/// All fields are optional; missing fields fall back to env or defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SyncFlowConfig {
    pub max_concurrent_nodes: Option<usize>,
    pub lock_timeout_ms: Option<u64>,
    pub lock_contention: Option<LockContentionPolicy>,
    pub flows_dir: Option<String>,
    /// Folder id → directory mappings.
    pub folders: Option<HashMap<String, String>>,
}

impl SyncFlowConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `syncflow.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new("syncflow.yaml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: SyncFlowConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }

    /// Executor settings with this config's overrides applied.
    pub fn executor_settings(&self) -> ExecutorSettings {
        let mut settings = ExecutorSettings::default();
        if let Some(n) = self.max_concurrent_nodes.filter(|n| *n > 0) {
            settings.max_concurrent_nodes = n;
        }
        if let Some(ms) = self.lock_timeout_ms {
            settings.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = self.lock_contention {
            settings.lock_contention = policy;
        }
        settings
    }
}
