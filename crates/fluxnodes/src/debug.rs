use async_trait::async_trait;
use fluxcore::{Node, NodeContext, NodeError, NodeOutput};
use fluxruntime::{NodeFactory, NodeMetadata};
use serde_json::Value;
use std::collections::HashMap;

/// Simple debug node that logs its input items and passes them on
pub struct DebugNode {
    label: Option<String>,
}

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let label = self.label.as_deref().unwrap_or(&ctx.node_name);
        let items = ctx.all_inputs();

        tracing::info!("DEBUG [{}]: {} item(s)", label, items.len());
        for (index, item) in items.iter().enumerate() {
            let body = Value::Object(item.json.clone());
            tracing::info!("  [{}] {}", index, body);
        }

        Ok(NodeOutput::main(items))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DebugNode {
            label: parameters
                .get("label")
                .and_then(Value::as_str)
                .map(str::to_string),
        }))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Logs input items for debugging", "debug")
    }
}
