use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single node invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::ExecutionFailed(_) | NodeError::Timeout { .. })
    }
}

/// A node error attributed to the node that raised it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Node '{node_name}' failed: {error}")]
pub struct NodeFailure {
    pub node_name: String,
    pub error: NodeError,
}

impl NodeFailure {
    pub fn new(node_name: impl Into<String>, error: NodeError) -> Self {
        Self {
            node_name: node_name.into(),
            error,
        }
    }
}

/// Structural problems found before any node runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Duplicate node name: {0}")]
    DuplicateName(String),

    #[error("Connection references unknown node '{node}' ({side})")]
    DanglingReference { node: String, side: &'static str },

    #[error("Cycle detected among nodes: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Unknown node type '{node_type}' on node '{node}'")]
    UnknownNodeType { node: String, node_type: String },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),
}
