use async_trait::async_trait;
use fluxcore::{Node, NodeContext, NodeError, NodeOutput};
use fluxruntime::{NodeFactory, NodeMetadata};
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay execution for a specified duration, then pass the input through
pub struct DelayNode {
    delay: Duration,
}

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        tracing::debug!("Node {} delaying for {}ms", ctx.node_name, self.delay.as_millis());

        tokio::select! {
            _ = sleep(self.delay) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        Ok(NodeOutput::main(ctx.all_inputs()))
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        let delay_ms = match parameters.get("delayMs") {
            None => DEFAULT_DELAY_MS,
            Some(value) => value.as_u64().ok_or_else(|| NodeError::InvalidInputType {
                field: "delayMs".to_string(),
                expected: "non-negative integer".to_string(),
                actual: value.to_string(),
            })?,
        };
        Ok(Box::new(DelayNode {
            delay: Duration::from_millis(delay_ms),
        }))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Delay execution for specified milliseconds", "time")
    }
}
