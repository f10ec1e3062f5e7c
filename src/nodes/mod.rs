pub mod builtin;
pub mod interpolate;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::backends::{MirrorBackend, PeerSyncBackend, SnapshotBackend};
use crate::engine::types::{NodeInputs, NodeResult};

/// Trait that all node implementations must implement.
#[async_trait]
pub trait Node: Send + Sync {
    /// Implementation name flows refer to (e.g., "mirror_copy", "log").
    fn node_type(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Run the node. `inputs` carries the trigger and the results of the
    /// node's dependencies. An `Err` is recorded as a failed result.
    async fn execute(&self, config: &serde_json::Value, inputs: NodeInputs) -> Result<NodeResult>;
}

/// Registry of available node implementations.
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn Node>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Create a registry with the built-in nodes that need no backend.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register the nodes that drive the external engines.
    pub fn register_backends(
        &mut self,
        mirror: Option<Arc<dyn MirrorBackend>>,
        snapshot: Option<Arc<dyn SnapshotBackend>>,
        peer: Option<Arc<dyn PeerSyncBackend>>,
    ) {
        if let Some(backend) = mirror {
            self.register(Arc::new(builtin::mirror_node::MirrorCopyNode::new(backend)));
        }
        if let Some(backend) = snapshot {
            self.register(Arc::new(builtin::snapshot_node::SnapshotNode::new(backend)));
        }
        if let Some(backend) = peer {
            self.register(Arc::new(builtin::peer_node::PeerStorageStatusNode::new(
                backend,
            )));
        }
    }

    /// Register a node implementation.
    pub fn register(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.node_type().to_string(), node);
    }

    /// Look up a node by implementation name.
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(node_type).cloned()
    }

    /// List all registered implementations with descriptions.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .nodes
            .values()
            .map(|n| (n.node_type(), n.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }
}

/// Read a string field from a node config.
pub(crate) fn config_str<'a>(config: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}
