//! Ordered execution feed and its projections.
//!
//! Every observable transition of a run becomes exactly one
//! [`ExecutionEvent`]. The live SSE stream and the synchronous JSON result
//! are both built from that same sequence.

use fluxcore::{
    EventKind, ExecutionEvent, ExecutionId, NodeErrorRecord, NodeItem, NodeOutput, RunState,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::{broadcast, mpsc};

/// Synchronous result of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub status: RunState,
    pub data: BTreeMap<String, Vec<NodeItem>>,
    pub errors: Vec<NodeErrorRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            status: RunState::Running,
            data: BTreeMap::new(),
            errors: Vec::new(),
            error: None,
        }
    }
}

/// Folds an event sequence into an [`ExecutionReport`].
#[derive(Debug, Clone)]
pub struct ReportCollector {
    report: ExecutionReport,
    finished: bool,
}

impl ReportCollector {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            report: ExecutionReport::new(execution_id),
            finished: false,
        }
    }

    /// Apply one event; returns true once a terminal event has been seen.
    pub fn push(&mut self, event: &ExecutionEvent) -> bool {
        match event.kind {
            EventKind::ExecutionStart => self.report.status = RunState::Running,
            EventKind::NodeStart => {}
            EventKind::NodeComplete => {
                if let Some(name) = &event.node_name {
                    self.report
                        .data
                        .insert(name.clone(), event.data.clone().unwrap_or_default());
                }
            }
            EventKind::NodeError => {
                if let Some(name) = &event.node_name {
                    self.report.errors.push(NodeErrorRecord {
                        node_name: name.clone(),
                        error: event.error.clone().unwrap_or_default(),
                        timestamp: event.timestamp,
                    });
                }
            }
            EventKind::ExecutionResult => {
                if let Some(result) = &event.result {
                    self.report.data = result.clone();
                }
            }
            EventKind::ExecutionComplete => {
                self.report.status = event.status.unwrap_or(RunState::Succeeded);
            }
            EventKind::ExecutionError => {
                self.report.status = event.status.unwrap_or(RunState::Failed);
                self.report.error = event.error.clone();
            }
        }
        if let Some(errors) = &event.errors {
            self.report.errors = errors.clone();
        }
        self.finished |= event.is_terminal();
        self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn report(&self) -> &ExecutionReport {
        &self.report
    }

    pub fn into_report(self) -> ExecutionReport {
        self.report
    }
}

/// Drain a run's event channel until its terminal event and build the report.
pub async fn collect_report(
    execution_id: ExecutionId,
    events: &mut mpsc::UnboundedReceiver<ExecutionEvent>,
) -> ExecutionReport {
    let mut collector = ReportCollector::new(execution_id);
    while let Some(event) = events.recv().await {
        if collector.push(&event) {
            break;
        }
    }
    collector.into_report()
}

/// One `text/event-stream` frame.
pub fn to_sse_frame(event: &ExecutionEvent) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// Turns runner transitions into protocol events, in emission order.
///
/// Events go to the run's own subscriber (if still connected) and to the
/// runtime-wide bus. A vanished subscriber is forgotten; the run goes on.
pub struct ExecutionStreamer {
    execution_id: ExecutionId,
    subscriber: Option<mpsc::UnboundedSender<ExecutionEvent>>,
    bus: Option<broadcast::Sender<ExecutionEvent>>,
    collector: ReportCollector,
    total: usize,
    finished_nodes: HashSet<String>,
}

impl ExecutionStreamer {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            subscriber: None,
            bus: None,
            collector: ReportCollector::new(execution_id),
            total: 0,
            finished_nodes: HashSet::new(),
        }
    }

    pub fn with_subscriber(mut self, subscriber: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    pub fn with_bus(mut self, bus: broadcast::Sender<ExecutionEvent>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    pub fn execution_start(&mut self) {
        let event = ExecutionEvent::new(EventKind::ExecutionStart, self.execution_id)
            .with_status(RunState::Running)
            .with_progress(0, self.total);
        self.publish(event);
    }

    pub fn node_start(&mut self, name: &str, node_type: &str) {
        let event = ExecutionEvent::new(EventKind::NodeStart, self.execution_id)
            .with_node(name, node_type);
        let event = self.with_progress(event);
        self.publish(event);
    }

    pub fn node_complete(&mut self, name: &str, node_type: &str, output: &NodeOutput) {
        self.finished_nodes.insert(name.to_string());
        let outputs: BTreeMap<String, Vec<NodeItem>> = output
            .fired()
            .map(|(slot, items)| (slot.to_string(), items.to_vec()))
            .collect();
        let event = ExecutionEvent::new(EventKind::NodeComplete, self.execution_id)
            .with_node(name, node_type)
            .with_data(output.primary_items())
            .with_outputs(outputs);
        let event = self.with_progress(event);
        self.publish(event);
    }

    pub fn node_error(&mut self, name: &str, node_type: &str, error: &str) {
        self.finished_nodes.insert(name.to_string());
        let event = ExecutionEvent::new(EventKind::NodeError, self.execution_id)
            .with_node(name, node_type)
            .with_error(error);
        let event = self.with_progress(event);
        self.publish(event);
    }

    /// Aggregated per-node data, emitted once before the terminal event.
    pub fn execution_result(&mut self, status: RunState) {
        let data = self.collector.report().data.clone();
        let event = ExecutionEvent::new(EventKind::ExecutionResult, self.execution_id)
            .with_result(data)
            .with_status(status);
        self.publish(event);
    }

    pub fn execution_complete(&mut self, status: RunState) {
        let errors = self.collector.report().errors.clone();
        let event = ExecutionEvent::new(EventKind::ExecutionComplete, self.execution_id)
            .with_status(status)
            .with_errors(errors);
        let event = self.with_progress(event);
        self.publish(event);
    }

    pub fn execution_error(&mut self, status: RunState, error: &str) {
        let errors = self.collector.report().errors.clone();
        let event = ExecutionEvent::new(EventKind::ExecutionError, self.execution_id)
            .with_status(status)
            .with_error(error)
            .with_errors(errors);
        let event = self.with_progress(event);
        self.publish(event);
    }

    /// The report as projected from everything emitted so far.
    pub fn into_report(self) -> ExecutionReport {
        self.collector.into_report()
    }

    fn with_progress(&self, event: ExecutionEvent) -> ExecutionEvent {
        let completed = self.finished_nodes.len();
        event.with_progress(completed, self.total.max(completed))
    }

    fn publish(&mut self, event: ExecutionEvent) {
        self.collector.push(&event);

        if let Some(bus) = &self.bus {
            let _ = bus.send(event.clone());
        }
        if let Some(subscriber) = &self.subscriber {
            if subscriber.send(event).is_err() {
                tracing::debug!(
                    execution_id = %self.execution_id,
                    "Event subscriber disconnected; run continues"
                );
                self.subscriber = None;
            }
        }
    }
}
