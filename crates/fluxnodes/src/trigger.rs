use async_trait::async_trait;
use fluxcore::{Node, NodeContext, NodeError, NodeItem, NodeOutput};
use fluxruntime::{NodeFactory, NodeMetadata, PortDefinition};
use serde_json::Value;
use std::collections::HashMap;

/// Start node for manually triggered runs: emits the run input.
pub struct ManualTriggerNode;

#[async_trait]
impl Node for ManualTriggerNode {
    fn node_type(&self) -> &str {
        "trigger.manual"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut items = ctx.all_inputs();
        if items.is_empty() {
            items.push(NodeItem::empty());
        }
        tracing::debug!(node = %ctx.node_name, items = items.len(), "Manual trigger fired");
        Ok(NodeOutput::main(items))
    }
}

pub struct ManualTriggerNodeFactory;

impl NodeFactory for ManualTriggerNodeFactory {
    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ManualTriggerNode))
    }

    fn node_type(&self) -> &str {
        "trigger.manual"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Starts a workflow with the run input", "trigger")
            .with_inputs(vec![])
            .with_outputs(vec![PortDefinition::optional("main", "Run input items")])
    }
}
