use crate::executor::{NodeExecutor, NodeRun};
use crate::registry::NodeRegistry;
use crate::resolver::{ExecutionPlan, GraphResolver};
use crate::router::OutputRouter;
use crate::streamer::{collect_report, ExecutionReport, ExecutionStreamer};
use fluxcore::{
    items_from_json, ExecutionContext, ExecutionEvent, ExecutionId, FlowError, Node, NodeContext,
    NodeError, NodeFailure, RunState, Workflow, MAIN_SLOT,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type NodeTask = JoinHandle<(String, Result<NodeRun, NodeFailure>)>;

/// A run started in the background.
pub struct RunHandle {
    pub execution_id: ExecutionId,
    /// Ordered event feed of this run; closes after the terminal event.
    pub events: mpsc::UnboundedReceiver<ExecutionEvent>,
    cancellation: CancellationToken,
    finished: CancellationToken,
    task: JoinHandle<ExecutionReport>,
}

impl RunHandle {
    /// Request cancellation; already completed outputs are kept.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Token that fires once the run task has ended, however it ended.
    pub fn finished_token(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// Wait for the run to finish and return its report.
    pub async fn wait(self) -> Result<ExecutionReport, FlowError> {
        self.task
            .await
            .map_err(|e| FlowError::Execution(format!("Run task failed: {}", e)))
    }

    /// Consume events until the terminal one and fold them into a report.
    pub async fn collect(mut self) -> ExecutionReport {
        collect_report(self.execution_id, &mut self.events).await
    }
}

/// How a run left the `Running` state.
enum Finish {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Round-based workflow state machine.
///
/// `Idle → Validating → Running → {Succeeded | Failed | Cancelled}`. Each
/// round dispatches every ready node, at most `max_parallel` at a time,
/// routes the results and then re-evaluates readiness.
#[derive(Clone)]
pub struct WorkflowRunner {
    registry: Arc<NodeRegistry>,
    max_parallel: usize,
    node_timeout_ms: Option<u64>,
    bus: Option<broadcast::Sender<ExecutionEvent>>,
}

impl WorkflowRunner {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            max_parallel: 10,
            node_timeout_ms: None,
            bus: None,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_node_timeout(mut self, node_timeout_ms: Option<u64>) -> Self {
        self.node_timeout_ms = node_timeout_ms;
        self
    }

    pub fn with_event_bus(mut self, bus: broadcast::Sender<ExecutionEvent>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run to completion in the current task.
    pub async fn run(&self, workflow: &Workflow, input: serde_json::Value) -> ExecutionReport {
        self.run_with_cancel(workflow, input, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        workflow: &Workflow,
        input: serde_json::Value,
        cancellation: CancellationToken,
    ) -> ExecutionReport {
        let streamer = self.streamer(ExecutionId::new_v4());
        self.execute(workflow, input, cancellation, streamer).await
    }

    /// Start a run in the background. The run is not tied to the handle:
    /// dropping the event receiver does not stop it.
    pub fn start(&self, workflow: Workflow, input: serde_json::Value) -> RunHandle {
        self.start_with_cancel(workflow, input, CancellationToken::new())
    }

    pub fn start_with_cancel(
        &self,
        workflow: Workflow,
        input: serde_json::Value,
        cancellation: CancellationToken,
    ) -> RunHandle {
        let execution_id = ExecutionId::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let streamer = self.streamer(execution_id).with_subscriber(tx);

        let runner = self.clone();
        let token = cancellation.clone();
        let finished = CancellationToken::new();
        let guard = finished.clone().drop_guard();
        let task = tokio::spawn(async move {
            let _guard = guard;
            runner.execute(&workflow, input, token, streamer).await
        });

        RunHandle {
            execution_id,
            events: rx,
            cancellation,
            finished,
            task,
        }
    }

    fn streamer(&self, execution_id: ExecutionId) -> ExecutionStreamer {
        let streamer = ExecutionStreamer::new(execution_id);
        match &self.bus {
            Some(bus) => streamer.with_bus(bus.clone()),
            None => streamer,
        }
    }

    async fn execute(
        &self,
        workflow: &Workflow,
        input: serde_json::Value,
        cancellation: CancellationToken,
        mut streamer: ExecutionStreamer,
    ) -> ExecutionReport {
        let execution_id = streamer.execution_id();
        let start_time = Instant::now();
        let mut state = RunState::Idle;

        transition(&mut state, RunState::Validating, execution_id);
        let prepared = match self.prepare(workflow).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("Workflow {} rejected: {}", workflow.id, e);
                transition(&mut state, RunState::Failed, execution_id);
                streamer.execution_error(RunState::Failed, &e.to_string());
                return streamer.into_report();
            }
        };
        let (plan, instances) = prepared;

        transition(&mut state, RunState::Running, execution_id);
        tracing::info!("Starting workflow execution: {}", workflow.id);
        streamer.set_total(plan.scheduled_count());
        streamer.execution_start();

        let finish = self
            .run_rounds(workflow, &plan, &instances, input, &cancellation, &mut streamer)
            .await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        match finish {
            Finish::Succeeded => {
                transition(&mut state, RunState::Succeeded, execution_id);
                tracing::info!("Workflow {} completed in {}ms", workflow.id, duration_ms);
                streamer.execution_result(RunState::Succeeded);
                streamer.execution_complete(RunState::Succeeded);
            }
            Finish::Cancelled => {
                transition(&mut state, RunState::Cancelled, execution_id);
                tracing::warn!("Workflow {} cancelled after {}ms", workflow.id, duration_ms);
                streamer.execution_result(RunState::Cancelled);
                streamer.execution_complete(RunState::Cancelled);
            }
            Finish::Failed(error) => {
                transition(&mut state, RunState::Failed, execution_id);
                tracing::error!("Workflow {} failed after {}ms: {}", workflow.id, duration_ms, error);
                streamer.execution_result(RunState::Failed);
                streamer.execution_error(RunState::Failed, &error);
            }
        }

        streamer.into_report()
    }

    /// Validate the graph and create a node instance per scheduled node.
    async fn prepare(
        &self,
        workflow: &Workflow,
    ) -> Result<(ExecutionPlan, HashMap<String, Arc<dyn Node>>), FlowError> {
        let plan = GraphResolver::new(&self.registry).resolve(workflow)?;

        let mut instances = HashMap::new();
        for planned in plan.nodes().filter(|n| n.scheduled) {
            let definition = &planned.definition;
            let mut node = self
                .registry
                .create_node(&definition.node_type, &definition.parameters)?;
            node.initialize().await.map_err(|e| {
                FlowError::Execution(format!(
                    "Node initialization failed for '{}': {}",
                    definition.name, e
                ))
            })?;
            instances.insert(definition.name.clone(), Arc::from(node));
        }

        Ok((plan, instances))
    }

    async fn run_rounds(
        &self,
        workflow: &Workflow,
        plan: &ExecutionPlan,
        instances: &HashMap<String, Arc<dyn Node>>,
        input: serde_json::Value,
        cancellation: &CancellationToken,
        streamer: &mut ExecutionStreamer,
    ) -> Finish {
        let context = ExecutionContext::new();
        let executor = NodeExecutor::new(workflow.settings.node_timeout_ms.or(self.node_timeout_ms));
        let max_parallel = workflow
            .settings
            .max_parallel_nodes
            .unwrap_or(self.max_parallel)
            .max(1);

        let mut router = OutputRouter::new(plan);
        let start_items = items_from_json(input);
        for name in plan.start_nodes() {
            router.seed(name, MAIN_SLOT, start_items.clone());
        }

        let mut round = 0usize;
        loop {
            if cancellation.is_cancelled() {
                return Finish::Cancelled;
            }

            let mut iterating = HashSet::new();
            for node in plan.nodes().filter(|n| n.reentrant) {
                if context.contains(&node.definition.name).await {
                    iterating.insert(node.definition.name.clone());
                }
            }

            let ready = router.ready_nodes(&iterating);
            if ready.is_empty() {
                let stranded = router.pending();
                if !stranded.is_empty() {
                    tracing::warn!(
                        "Nodes never received all required inputs: {}",
                        stranded.join(", ")
                    );
                }
                if !iterating.is_empty() {
                    let mut names: Vec<_> = iterating.into_iter().collect();
                    names.sort();
                    tracing::warn!("Loop nodes left unfinished: {}", names.join(", "));
                }
                return Finish::Succeeded;
            }

            round += 1;
            tracing::debug!(round, ready = ?ready, "Dispatching round");

            let mut queue: VecDeque<String> = ready.into();
            let mut running: FuturesUnordered<NodeTask> = FuturesUnordered::new();
            let mut in_flight: HashSet<String> = HashSet::new();

            while !queue.is_empty() || !running.is_empty() {
                while running.len() < max_parallel && !cancellation.is_cancelled() {
                    let Some(name) = queue.pop_front() else {
                        break;
                    };
                    let (Some(planned), Some(node)) = (plan.node(&name), instances.get(&name))
                    else {
                        settle_failed(running, in_flight, plan, &mut router, streamer).await;
                        return Finish::Failed(format!("Node not found: {}", name));
                    };

                    let ctx = NodeContext {
                        execution_id: streamer.execution_id(),
                        node_name: name.clone(),
                        inputs: router.take_inputs(&name),
                        parameters: planned.definition.parameters.clone(),
                        subnodes: planned.subnodes.clone(),
                        state: context.scoped(name.clone()),
                        cancellation: cancellation.child_token(),
                    };

                    streamer.node_start(&name, &planned.definition.node_type);
                    in_flight.insert(name.clone());

                    let executor = executor.clone();
                    let node = Arc::clone(node);
                    let definition = planned.definition.clone();
                    running.push(tokio::spawn(async move {
                        let result = executor.execute(node, &definition, ctx).await;
                        (definition.name, result)
                    }));
                }

                let joined = tokio::select! {
                    biased;
                    Some(joined) = running.next() => joined,
                    _ = cancellation.cancelled() => {
                        settle_cancelled(running, plan, &mut router, streamer).await;
                        return Finish::Cancelled;
                    }
                };

                let (name, result) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        settle_failed(running, in_flight, plan, &mut router, streamer).await;
                        return Finish::Failed(format!("Task join error: {}", e));
                    }
                };
                in_flight.remove(&name);
                match result {
                    Ok(run) => record(plan, &mut router, streamer, &name, &run),
                    Err(failure)
                        if failure.error == NodeError::Cancelled && cancellation.is_cancelled() =>
                    {
                        settle_cancelled(running, plan, &mut router, streamer).await;
                        return Finish::Cancelled;
                    }
                    Err(failure) => {
                        tracing::error!("{}", failure);
                        streamer.node_error(&name, node_type(plan, &name), &failure.error.to_string());
                        settle_failed(running, in_flight, plan, &mut router, streamer).await;
                        return Finish::Failed(failure.to_string());
                    }
                }
            }
        }
    }
}

fn node_type<'a>(plan: &'a ExecutionPlan, name: &str) -> &'a str {
    plan.node(name)
        .map(|n| n.definition.node_type.as_str())
        .unwrap_or_default()
}

/// Emit the outcome of a finished node and route its outputs downstream.
fn record(
    plan: &ExecutionPlan,
    router: &mut OutputRouter<'_>,
    streamer: &mut ExecutionStreamer,
    name: &str,
    run: &NodeRun,
) {
    if let Some(failure) = &run.error {
        streamer.node_error(name, node_type(plan, name), &failure.error.to_string());
        return;
    }

    tracing::info!(
        "Node {} completed in {}ms ({} attempt(s){})",
        name,
        run.duration_ms,
        run.attempts,
        if run.pinned { ", pinned" } else { "" }
    );
    streamer.node_complete(name, node_type(plan, name), &run.output);
    for delivery in router.route(name, &run.output) {
        tracing::debug!(
            "{}.{} -> {}.{} ({} items)",
            delivery.source,
            delivery.output,
            delivery.target,
            delivery.input,
            delivery.items
        );
    }
}

/// Stop in-flight nodes after cancellation. Nodes that had already
/// finished still get their outputs recorded.
async fn settle_cancelled(
    mut running: FuturesUnordered<NodeTask>,
    plan: &ExecutionPlan,
    router: &mut OutputRouter<'_>,
    streamer: &mut ExecutionStreamer,
) {
    abort_all(&running);
    while let Some(joined) = running.next().await {
        if let Ok((name, Ok(run))) = joined {
            record(plan, router, streamer, &name, &run);
        }
    }
}

/// Stop the rest of a round after a node failure. Nodes that had already
/// finished keep their outputs; nodes cut off mid-run end with `node:error`.
async fn settle_failed(
    mut running: FuturesUnordered<NodeTask>,
    mut in_flight: HashSet<String>,
    plan: &ExecutionPlan,
    router: &mut OutputRouter<'_>,
    streamer: &mut ExecutionStreamer,
) {
    abort_all(&running);
    while let Some(joined) = running.next().await {
        let Ok((name, result)) = joined else {
            continue;
        };
        in_flight.remove(&name);
        match result {
            Ok(run) => record(plan, router, streamer, &name, &run),
            Err(failure) => {
                streamer.node_error(&name, node_type(plan, &name), &failure.error.to_string())
            }
        }
    }

    let mut aborted: Vec<String> = in_flight.into_iter().collect();
    aborted.sort_by(|a, b| plan.sort_key(a).cmp(&plan.sort_key(b)));
    for name in aborted {
        tracing::warn!("Node {} aborted after workflow failure", name);
        streamer.node_error(&name, node_type(plan, &name), "Aborted: workflow failed");
    }
}

fn abort_all(running: &FuturesUnordered<NodeTask>) {
    for task in running.iter() {
        task.abort();
    }
}

fn transition(state: &mut RunState, next: RunState, execution_id: ExecutionId) {
    tracing::debug!(execution_id = %execution_id, "Run state {:?} -> {:?}", state, next);
    *state = next;
}
