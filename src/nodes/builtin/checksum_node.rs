use std::path::Path;

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use crate::engine::types::{NodeInputs, NodeResult, ReturnValues};
use crate::events::checksum::{HashAlgorithm, file_digest};
use crate::nodes::interpolate::interpolate;
use crate::nodes::{Node, config_str};

pub struct FileChecksumNode;

#[async_trait]
impl Node for FileChecksumNode {
    fn node_type(&self) -> &str {
        "file_checksum"
    }

    fn description(&self) -> &str {
        "Compute the checksum (MD5 or SHA-256) of a file"
    }

    async fn execute(&self, config: &serde_json::Value, inputs: NodeInputs) -> Result<NodeResult> {
        let path = config_str(config, "path")
            .ok_or_else(|| anyhow::anyhow!("file_checksum requires 'path' parameter"))?;
        let path = interpolate(path, &inputs);

        let algorithm: HashAlgorithm = config_str(config, "algorithm")
            .unwrap_or("md5")
            .parse()?;

        let output_key = config_str(config, "output_key").unwrap_or("checksum");

        let digest = file_digest(Path::new(&path), algorithm)
            .await
            .with_context(|| format!("Failed to hash file: {}", path))?;

        let mut values = ReturnValues::new();
        values.insert(output_key.to_string(), serde_json::Value::String(digest));
        values.insert(
            format!("{}_algorithm", output_key),
            algorithm.as_str().into(),
        );
        values.insert("path".to_string(), path.into());
        Ok(NodeResult::success(values))
    }
}
