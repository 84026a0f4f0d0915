//! Standard node library
//!
//! Collection of built-in nodes for common operations

mod debug;
mod flow;
mod http;
mod time;
mod transform;
mod trigger;

pub use debug::DebugNode;
pub use flow::{IfNode, MergeNode, SplitInBatchesNode};
pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, SetNode};
pub use trigger::ManualTriggerNode;

use fluxruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(trigger::ManualTriggerNodeFactory));
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(flow::IfNodeFactory));
    registry.register(Arc::new(flow::MergeNodeFactory));
    registry.register(Arc::new(flow::SplitInBatchesNodeFactory));
    registry.register(Arc::new(transform::SetNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(http::HttpRequestNodeFactory));
}

/// A registry holding every standard node
pub fn default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
