use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tracing::info;

use crate::backends::{CopyRequest, MirrorBackend, settle};
use crate::engine::types::{NodeInputs, NodeResult};
use crate::nodes::Node;
use crate::nodes::interpolate::interpolate;

/// Copies between two locations through the mirroring backend.
///
/// Config is a copy request; path fields may reference the trigger or
/// dependency results, e.g. `path: "/backup/${trigger.file_id}"`.
pub struct MirrorCopyNode {
    backend: Arc<dyn MirrorBackend>,
}

impl MirrorCopyNode {
    pub fn new(backend: Arc<dyn MirrorBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Node for MirrorCopyNode {
    fn node_type(&self) -> &str {
        "mirror_copy"
    }

    fn description(&self) -> &str {
        "Copy files from a source to a destination with the mirroring tool"
    }

    async fn execute(&self, config: &serde_json::Value, inputs: NodeInputs) -> Result<NodeResult> {
        let mut request: CopyRequest = serde_json::from_value(config.clone())
            .context("mirror_copy requires 'source' and 'destination' with 'path'")?;

        request.source.path = interpolate(&request.source.path, &inputs);
        request.destination.path = interpolate(&request.destination.path, &inputs);

        info!(
            source = %request.source.path,
            destination = %request.destination.path,
            excludes = request.excludes.len(),
            "Starting mirror copy"
        );

        Ok(settle(self.backend.copy(&request).await).into_tool_result(self.node_type()))
    }
}
