use fluxcore::{Node, NodeContext, NodeDefinition, NodeError, NodeFailure, NodeOutput};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};

/// Outcome of one node invocation after the retry policy has been applied.
#[derive(Debug, Clone)]
pub struct NodeRun {
    pub output: NodeOutput,
    /// Attempts made; zero when pinned data short-circuited execution.
    pub attempts: u32,
    pub duration_ms: u64,
    pub pinned: bool,
    /// Set when the node failed but `continueOnFail` swallowed the error.
    pub error: Option<NodeFailure>,
}

/// Runs a single node with its pinned-data, retry and continue-on-fail policy.
#[derive(Debug, Clone, Default)]
pub struct NodeExecutor {
    node_timeout: Option<Duration>,
}

impl NodeExecutor {
    pub fn new(node_timeout_ms: Option<u64>) -> Self {
        Self {
            node_timeout: node_timeout_ms.map(Duration::from_millis),
        }
    }

    pub async fn execute(
        &self,
        node: Arc<dyn Node>,
        definition: &NodeDefinition,
        ctx: NodeContext,
    ) -> Result<NodeRun, NodeFailure> {
        let start = Instant::now();

        if let Some(pinned) = &definition.pinned_data {
            tracing::debug!(node = %definition.name, "Using pinned data");
            return Ok(NodeRun {
                output: NodeOutput::main(pinned.clone()),
                attempts: 0,
                duration_ms: 0,
                pinned: true,
                error: None,
            });
        }

        let max_attempts = definition.max_retries() + 1;
        let retry_delay = Duration::from_millis(definition.retry_delay);
        let cancellation = ctx.cancellation.clone();
        let mut attempt = 1u32;

        let error = loop {
            if cancellation.is_cancelled() {
                break NodeError::Cancelled;
            }

            match self.attempt(node.as_ref(), ctx.clone()).await {
                Ok(output) => {
                    return Ok(NodeRun {
                        output,
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                        pinned: false,
                        error: None,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        "Node '{}' attempt {}/{} failed: {}. Retrying in {}ms",
                        definition.name,
                        attempt,
                        max_attempts,
                        e,
                        retry_delay.as_millis()
                    );
                    tokio::select! {
                        _ = sleep(retry_delay) => {}
                        _ = cancellation.cancelled() => break NodeError::Cancelled,
                    }
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        let failure = NodeFailure::new(&definition.name, error);
        if definition.continue_on_fail && failure.error != NodeError::Cancelled {
            tracing::warn!("{} (continuing)", failure);
            return Ok(NodeRun {
                output: NodeOutput::new(),
                attempts: attempt,
                duration_ms: start.elapsed().as_millis() as u64,
                pinned: false,
                error: Some(failure),
            });
        }

        Err(failure)
    }

    async fn attempt(&self, node: &dyn Node, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let cancellation = ctx.cancellation.clone();
        let call = async {
            match self.node_timeout {
                Some(limit) => timeout(limit, node.execute(ctx))
                    .await
                    .unwrap_or(Err(NodeError::Timeout {
                        millis: limit.as_millis() as u64,
                    })),
                None => node.execute(ctx).await,
            }
        };

        tokio::select! {
            biased;
            result = call => result,
            _ = cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}
