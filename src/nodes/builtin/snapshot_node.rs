use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tracing::info;

use crate::backends::{SnapshotBackend, SnapshotCommand, settle};
use crate::engine::types::{NodeInputs, NodeResult};
use crate::nodes::interpolate::interpolate;
use crate::nodes::{Node, config_str};

pub struct SnapshotNode {
    backend: Arc<dyn SnapshotBackend>,
}

impl SnapshotNode {
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Node for SnapshotNode {
    fn node_type(&self) -> &str {
        "snapshot_backup"
    }

    fn description(&self) -> &str {
        "Initialize, back up to, or read stats of a snapshot repository"
    }

    async fn execute(&self, config: &serde_json::Value, inputs: NodeInputs) -> Result<NodeResult> {
        let repository = config_str(config, "repository")
            .ok_or_else(|| anyhow::anyhow!("snapshot_backup requires 'repository' parameter"))?;
        let repository = interpolate(repository, &inputs);

        let mut command: SnapshotCommand = serde_json::from_value(config.clone())
            .context("snapshot_backup requires 'command' (init, backup or stats)")?;

        if let SnapshotCommand::Backup { paths, .. } = &mut command {
            if paths.is_empty() {
                anyhow::bail!("snapshot_backup 'backup' needs at least one path");
            }
            for path in paths.iter_mut() {
                *path = interpolate(path, &inputs);
            }
        }

        info!(repository = %repository, command = command.name(), "Running snapshot command");

        let mut result = settle(self.backend.run(&repository, &command).await);
        result
            .reported
            .insert("command".to_string(), command.name().into());
        Ok(result.into_tool_result(self.node_type()))
    }
}
