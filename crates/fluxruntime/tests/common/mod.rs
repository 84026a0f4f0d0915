#![allow(dead_code)]

use async_trait::async_trait;
use fluxcore::{Node, NodeContext, NodeError, NodeItem, NodeOutput, Workflow};
use fluxruntime::{NodeFactory, NodeMetadata, NodeRegistry, PortDefinition};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Make = dyn Fn(&HashMap<String, Value>) -> Box<dyn Node> + Send + Sync;

/// Factory built from a closure, for test-only node types.
pub struct TestFactory {
    node_type: &'static str,
    metadata: NodeMetadata,
    make: Box<Make>,
}

impl TestFactory {
    pub fn new(
        node_type: &'static str,
        metadata: NodeMetadata,
        make: impl Fn(&HashMap<String, Value>) -> Box<dyn Node> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_type,
            metadata,
            make: Box::new(make),
        })
    }
}

impl NodeFactory for TestFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok((self.make)(parameters))
    }

    fn node_type(&self) -> &str {
        self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        self.metadata.clone()
    }
}

/// Passes its `main` input through, tagging each item with its own name.
pub struct PassNode;

#[async_trait]
impl Node for PassNode {
    fn node_type(&self) -> &str {
        "test.pass"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items = ctx
            .all_inputs()
            .into_iter()
            .map(|mut item| {
                item.json.insert("via".to_string(), json!(ctx.node_name));
                item
            })
            .collect();
        Ok(NodeOutput::main(items))
    }
}

/// Fails `failures` times before succeeding; `-1` fails forever.
pub struct FlakyNode {
    failures: i64,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Node for FlakyNode {
    fn node_type(&self) -> &str {
        "test.flaky"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as i64;
        if self.failures < 0 || call < self.failures {
            return Err(NodeError::ExecutionFailed(format!("attempt {} failed", call + 1)));
        }
        Ok(NodeOutput::main(vec![NodeItem::new(json!({
            "attempts": call + 1,
            "from": ctx.node_name,
        }))]))
    }
}

/// Emits its input on the slot named by the `output` parameter.
pub struct BranchNode {
    output: String,
}

#[async_trait]
impl Node for BranchNode {
    fn node_type(&self) -> &str {
        "test.branch"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let other = if self.output == "true" { "false" } else { "true" };
        Ok(NodeOutput::new()
            .with_output(self.output.clone(), ctx.all_inputs())
            .without_output(other))
    }
}

/// Counts its own re-entries in the execution context and emits `loop`
/// until `iterations` is reached, then `done`.
pub struct CounterLoopNode {
    iterations: u64,
}

#[async_trait]
impl Node for CounterLoopNode {
    fn node_type(&self) -> &str {
        "test.loop"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let count = ctx
            .state
            .get()
            .await
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;

        if count > self.iterations {
            ctx.state.clear().await;
            return Ok(NodeOutput::new()
                .with_output("done", vec![NodeItem::new(json!({"iterations": count - 1}))]));
        }

        ctx.state.set(json!(count)).await;
        Ok(NodeOutput::new().with_output("loop", vec![NodeItem::new(json!({"iteration": count}))]))
    }
}

/// Cancels the given token and then completes normally.
pub struct CancellingNode {
    token: CancellationToken,
}

#[async_trait]
impl Node for CancellingNode {
    fn node_type(&self) -> &str {
        "test.cancel"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.token.cancel();
        Ok(NodeOutput::main(vec![NodeItem::new(json!({"cancelled": true}))]))
    }
}

/// Sleeps `ms` while tracking how many instances run at once.
pub struct SlowNode {
    ms: u64,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for SlowNode {
    fn node_type(&self) -> &str {
        "test.slow"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(self.ms)) => {
                Ok(NodeOutput::main(vec![NodeItem::new(json!({"slept": self.ms}))]))
            }
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Shared observation points for nodes created by [`registry`].
#[derive(Clone, Default)]
pub struct Probes {
    pub flaky_calls: Arc<AtomicU32>,
    pub slow_current: Arc<AtomicUsize>,
    pub slow_peak: Arc<AtomicUsize>,
    pub cancel: CancellationToken,
}

pub fn registry(probes: &Probes) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    registry.register(TestFactory::new(
        "test.pass",
        NodeMetadata::new("Pass-through", "test"),
        |_| Box::new(PassNode),
    ));

    let calls = probes.flaky_calls.clone();
    registry.register(TestFactory::new(
        "test.flaky",
        NodeMetadata::new("Fails a number of times", "test"),
        move |params| {
            Box::new(FlakyNode {
                failures: params.get("failures").and_then(Value::as_i64).unwrap_or(0),
                calls: calls.clone(),
            })
        },
    ));

    registry.register(TestFactory::new(
        "test.branch",
        NodeMetadata::new("Branch", "test").with_outputs(vec![
            PortDefinition::optional("true", ""),
            PortDefinition::optional("false", ""),
        ]),
        |params| {
            Box::new(BranchNode {
                output: params
                    .get("output")
                    .and_then(Value::as_str)
                    .unwrap_or("true")
                    .to_string(),
            })
        },
    ));

    registry.register(TestFactory::new(
        "test.join",
        NodeMetadata::new("Waits for both inputs", "test").with_inputs(vec![
            PortDefinition::required("a", ""),
            PortDefinition::required("b", ""),
        ]),
        |_| Box::new(PassNode),
    ));

    registry.register(TestFactory::new(
        "test.loop",
        NodeMetadata::new("Counting loop", "test")
            .with_outputs(vec![
                PortDefinition::loop_output("loop", ""),
                PortDefinition::optional("done", ""),
            ])
            .reentrant(),
        |params| {
            Box::new(CounterLoopNode {
                iterations: params.get("iterations").and_then(Value::as_u64).unwrap_or(3),
            })
        },
    ));

    let token = probes.cancel.clone();
    registry.register(TestFactory::new(
        "test.cancel",
        NodeMetadata::new("Cancels the run", "test"),
        move |_| {
            Box::new(CancellingNode {
                token: token.clone(),
            })
        },
    ));

    let (current, peak) = (probes.slow_current.clone(), probes.slow_peak.clone());
    registry.register(TestFactory::new(
        "test.slow",
        NodeMetadata::new("Sleeps", "test"),
        move |params| {
            Box::new(SlowNode {
                ms: params.get("ms").and_then(Value::as_u64).unwrap_or(20),
                current: current.clone(),
                peak: peak.clone(),
            })
        },
    ));

    registry
}

/// Workflow with the given `(name, type)` nodes and no connections.
pub fn workflow(nodes: &[(&str, &str)]) -> Workflow {
    let mut workflow = Workflow::new("test");
    for (name, node_type) in nodes {
        workflow.add_node(fluxcore::NodeDefinition::new(*name, *node_type));
    }
    workflow
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
