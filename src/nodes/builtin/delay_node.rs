use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{NodeInputs, NodeResult, ReturnValues};
use crate::nodes::Node;

pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "delay"
    }

    fn description(&self) -> &str {
        "Pause for a specified duration"
    }

    async fn execute(&self, config: &serde_json::Value, _inputs: NodeInputs) -> Result<NodeResult> {
        let seconds = config
            .get("seconds")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        if !seconds.is_finite() || seconds < 0.0 {
            anyhow::bail!("delay 'seconds' must be a non-negative number, got {}", seconds);
        }

        tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;

        let mut values = ReturnValues::new();
        values.insert("delay_seconds".to_string(), seconds.into());
        Ok(NodeResult::success(values))
    }
}
