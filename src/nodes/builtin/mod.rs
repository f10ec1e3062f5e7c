mod checksum_node;
mod command_node;
mod delay_node;
mod log_node;
pub mod mirror_node;
pub mod peer_node;
pub mod snapshot_node;

use std::sync::Arc;
use crate::nodes::NodeRegistry;

/// Register all backend-free built-in nodes into the registry.
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(log_node::LogNode));
    registry.register(Arc::new(delay_node::DelayNode));
    registry.register(Arc::new(command_node::ExternalCommandNode));
    registry.register(Arc::new(checksum_node::FileChecksumNode));
}
