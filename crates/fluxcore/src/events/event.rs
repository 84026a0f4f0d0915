use crate::NodeItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Kind of observable moment in a run, serialized as the event `type`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    #[serde(rename = "execution:start")]
    ExecutionStart,
    #[serde(rename = "node:start")]
    NodeStart,
    #[serde(rename = "node:complete")]
    NodeComplete,
    #[serde(rename = "node:error")]
    NodeError,
    #[serde(rename = "execution:result")]
    ExecutionResult,
    #[serde(rename = "execution:complete")]
    ExecutionComplete,
    #[serde(rename = "execution:error")]
    ExecutionError,
}

impl EventKind {
    /// The stream ends after one of these.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::ExecutionComplete | EventKind::ExecutionError)
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Validating,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// A node failure as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeErrorRecord {
    pub node_name: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// One event of the execution feed.
///
/// Fields beyond `type`, `executionId` and `timestamp` are optional and
/// additive; readers ignore fields they do not know.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub execution_id: ExecutionId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<NodeItem>>,
    /// Every fired output slot of a completed node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, Vec<NodeItem>>>,
    /// Per-node data of the whole run, carried by `execution:result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BTreeMap<String, Vec<NodeItem>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<NodeErrorRecord>>,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind, execution_id: ExecutionId) -> Self {
        Self {
            kind,
            execution_id,
            timestamp: Utc::now(),
            node_name: None,
            node_type: None,
            data: None,
            outputs: None,
            result: None,
            error: None,
            progress: None,
            status: None,
            errors: None,
        }
    }

    pub fn with_node(mut self, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_data(mut self, data: Vec<NodeItem>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_outputs(mut self, outputs: BTreeMap<String, Vec<NodeItem>>) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn with_result(mut self, result: BTreeMap<String, Vec<NodeItem>>) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_progress(mut self, completed: usize, total: usize) -> Self {
        self.progress = Some(Progress { completed, total });
        self
    }

    pub fn with_status(mut self, status: RunState) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_errors(mut self, errors: Vec<NodeErrorRecord>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
