use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::backends::{CommandResult, PeerSyncBackend};
use crate::engine::types::{NodeInputs, NodeResult};
use crate::nodes::interpolate::interpolate;
use crate::nodes::{Node, config_str};

pub struct PeerStorageStatusNode {
    backend: Arc<dyn PeerSyncBackend>,
}

impl PeerStorageStatusNode {
    pub fn new(backend: Arc<dyn PeerSyncBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Node for PeerStorageStatusNode {
    fn node_type(&self) -> &str {
        "peer_storage_status"
    }

    fn description(&self) -> &str {
        "Check that the peer-sync storage path of a folder is available"
    }

    async fn execute(&self, config: &serde_json::Value, inputs: NodeInputs) -> Result<NodeResult> {
        // Defaults to the folder that triggered the run
        let folder_id = config_str(config, "folder_id")
            .map(|f| interpolate(f, &inputs))
            .unwrap_or_else(|| inputs.trigger.folder_id.clone());

        let result = match self.backend.storage_status(&folder_id).await {
            Ok(status) => status.into_command_result(),
            Err(e) => CommandResult::from_invocation_error(&e),
        };
        Ok(result.into_tool_result(self.node_type()))
    }
}
