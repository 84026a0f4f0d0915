use crate::registry::NodeRegistry;
use crate::resolver::{ExecutionPlan, GraphResolver};
use crate::runner::{RunHandle, WorkflowRunner};
use crate::streamer::ExecutionReport;
use fluxcore::{
    EventBus, ExecutionEvent, ExecutionId, FlowError, GraphError, Workflow, WorkflowError,
    WorkflowId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Main runtime: node registry, saved workflows and active runs
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    runner: WorkflowRunner,
    event_bus: Arc<EventBus>,
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
    active_runs: Arc<RwLock<HashMap<ExecutionId, CancellationToken>>>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        Self::with_registry(registry, config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let runner = WorkflowRunner::new(Arc::clone(&registry))
            .with_max_parallel(config.max_parallel_nodes)
            .with_node_timeout(config.node_timeout_ms)
            .with_event_bus(event_bus.sender());

        Self {
            registry,
            runner,
            event_bus,
            workflows: Arc::new(RwLock::new(HashMap::new())),
            active_runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Check a workflow without running it
    pub fn validate(&self, workflow: &Workflow) -> Result<ExecutionPlan, GraphError> {
        GraphResolver::new(&self.registry).resolve(workflow)
    }

    /// Save a workflow, replacing any previous version with the same id
    pub async fn register_workflow(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id, workflow);
    }

    pub async fn get_workflow(&self, workflow_id: WorkflowId) -> Option<Workflow> {
        self.workflows.read().await.get(&workflow_id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        workflows
    }

    pub async fn remove_workflow(&self, workflow_id: WorkflowId) -> Option<Workflow> {
        self.workflows.write().await.remove(&workflow_id)
    }

    /// Set (or toggle, when `active` is `None`) external-trigger activation.
    pub async fn set_active(
        &self,
        workflow_id: WorkflowId,
        active: Option<bool>,
    ) -> Result<bool, FlowError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        workflow.active = active.unwrap_or(!workflow.active);
        tracing::info!("Workflow {} active = {}", workflow_id, workflow.active);
        Ok(workflow.active)
    }

    /// Execute a saved workflow by ID
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        input: serde_json::Value,
    ) -> Result<ExecutionReport, FlowError> {
        let workflow = self
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;

        Ok(self.start(workflow, input).await.collect().await)
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(&self, workflow: Workflow, input: serde_json::Value) -> ExecutionReport {
        self.start(workflow, input).await.collect().await
    }

    /// Start a saved workflow in the background
    pub async fn start_workflow(
        &self,
        workflow_id: WorkflowId,
        input: serde_json::Value,
    ) -> Result<RunHandle, FlowError> {
        let workflow = self
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;
        Ok(self.start(workflow, input).await)
    }

    /// Start a run in the background and track it for cancellation
    pub async fn start(&self, workflow: Workflow, input: serde_json::Value) -> RunHandle {
        let handle = self.runner.start(workflow, input);
        let execution_id = handle.execution_id;

        self.active_runs
            .write()
            .await
            .insert(execution_id, handle.cancellation_token());

        let active_runs = Arc::clone(&self.active_runs);
        let finished = handle.finished_token();
        tokio::spawn(async move {
            finished.cancelled().await;
            active_runs.write().await.remove(&execution_id);
        });

        handle
    }

    /// Request cancellation of an active run. Returns false if the run is
    /// unknown or already finished.
    pub async fn cancel(&self, execution_id: ExecutionId) -> bool {
        match self.active_runs.read().await.get(&execution_id) {
            Some(token) => {
                tracing::info!("Cancelling execution {}", execution_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Subscribe to execution events of every run
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Concurrency limit for nodes dispatched in the same round
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Per-attempt node timeout; workflows may override it
    pub node_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            node_timeout_ms: None,
        }
    }
}
