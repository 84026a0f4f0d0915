use fluxcore::{Node, NodeError, WorkflowError, MAIN_SLOT};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node with given parameters
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, ports, re-entrancy)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    /// Loop-style node that may be fed back its own output.
    pub reentrant: bool,
}

impl NodeMetadata {
    pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
            ..Self::default()
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PortDefinition>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<PortDefinition>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }

    /// Output slots that lead into the node's loop body.
    pub fn loop_outputs(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|port| port.loop_output)
            .map(|port| port.name.clone())
            .collect()
    }

    /// Input slots that must all hold data before the node may run.
    pub fn required_inputs(&self) -> Vec<String> {
        self.inputs
            .iter()
            .filter(|port| port.required)
            .map(|port| port.name.clone())
            .collect()
    }
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: vec![PortDefinition::optional(MAIN_SLOT, "")],
            outputs: vec![PortDefinition::optional(MAIN_SLOT, "")],
            reentrant: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
    /// Output whose downstream nodes form a loop body; only connections
    /// coming back from there may re-enter the node.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub loop_output: bool,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            loop_output: false,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
            loop_output: false,
        }
    }

    /// Output of a re-entrant node that starts another iteration.
    pub fn loop_output(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            loop_output: true,
            ..Self::optional(name, description)
        }
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::debug!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Create a node instance from a node type and parameters
    pub fn create_node(
        &self,
        node_type: &str,
        parameters: &HashMap<String, Value>,
    ) -> Result<Box<dyn Node>, WorkflowError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))?;

        let node = factory
            .create(parameters)
            .map_err(|e| WorkflowError::Invalid(format!("Failed to create node: {}", e)))?;
        node.validate_parameters(parameters)
            .map_err(|e| WorkflowError::Invalid(format!("{}: {}", node_type, e)))?;
        Ok(node)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
