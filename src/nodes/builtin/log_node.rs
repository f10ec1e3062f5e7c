use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{NodeInputs, NodeResult, ReturnValues};
use crate::nodes::interpolate::interpolate;
use crate::nodes::{Node, config_str};

pub struct LogNode;

#[async_trait]
impl Node for LogNode {
    fn node_type(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Write a message to the sync log"
    }

    async fn execute(&self, config: &serde_json::Value, inputs: NodeInputs) -> Result<NodeResult> {
        let message = config_str(config, "message").unwrap_or("");
        let level = config_str(config, "level").unwrap_or("info");

        let rendered = interpolate(message, &inputs);

        match level {
            "debug" => tracing::debug!(folder = %inputs.trigger.folder_id, "{}", rendered),
            "warn" => tracing::warn!(folder = %inputs.trigger.folder_id, "{}", rendered),
            "error" => tracing::error!(folder = %inputs.trigger.folder_id, "{}", rendered),
            _ => tracing::info!(folder = %inputs.trigger.folder_id, "{}", rendered),
        }

        let mut values = ReturnValues::new();
        values.insert(
            "log_message".to_string(),
            serde_json::Value::String(rendered),
        );
        Ok(NodeResult::success(values))
    }
}
