use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::backends::{CommandSpec, run_command, settle};
use crate::engine::types::{NodeInputs, NodeResult};
use crate::nodes::interpolate::interpolate;
use crate::nodes::{Node, config_str};

pub struct ExternalCommandNode;

#[async_trait]
impl Node for ExternalCommandNode {
    fn node_type(&self) -> &str {
        "external_command"
    }

    fn description(&self) -> &str {
        "Run an external tool as a subprocess and capture its outcome"
    }

    async fn execute(&self, config: &serde_json::Value, inputs: NodeInputs) -> Result<NodeResult> {
        let cmd = config_str(config, "cmd")
            .ok_or_else(|| anyhow::anyhow!("external_command requires 'cmd' parameter"))?;

        let args: Vec<String> = config
            .get("args")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(|a| interpolate(a, &inputs))
                    .collect()
            })
            .unwrap_or_default();

        let timeout_s = config
            .get("timeout")
            .and_then(|v| v.as_f64())
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(60.0);

        let mut spec = CommandSpec::new(cmd)
            .args(args)
            .timeout(Duration::from_secs_f64(timeout_s));

        if let Some(dir) = config_str(config, "cwd") {
            spec.cwd = Some(interpolate(dir, &inputs).into());
        }

        if let Some(env_map) = config.get("env").and_then(|v| v.as_object()) {
            for (k, v) in env_map {
                if let Some(val) = v.as_str() {
                    spec.env.push((k.clone(), interpolate(val, &inputs)));
                }
            }
        }

        let result = settle(run_command(&spec).await);
        if !result.success {
            warn!(cmd = %cmd, exit_code = result.exit_code, "External command failed");
        }

        Ok(result.into_tool_result(cmd))
    }
}
