use crate::{ExecutionId, NodeError, NodeItem, NodeState, MAIN_SLOT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "http.request", "flow.if")
    fn node_type(&self) -> &str;

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Initialize stateful resources before the run starts
    async fn initialize(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Validate parameters at workflow load time
    fn validate_parameters(
        &self,
        _parameters: &HashMap<String, serde_json::Value>,
    ) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Configuration supplied by a subnode attached to the executing node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnodeConfig {
    pub name: String,
    pub node_type: String,
    /// Input slot of the parent the subnode is attached to.
    pub slot: String,
    pub parameters: HashMap<String, serde_json::Value>,
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,

    /// Name of the node within its workflow
    pub node_name: String,

    /// Items received on each input slot, in arrival order
    pub inputs: BTreeMap<String, Vec<NodeItem>>,

    /// Static parameters for this node
    pub parameters: HashMap<String, serde_json::Value>,

    /// Subnodes attached through `subnode` connections
    pub subnodes: Vec<SubnodeConfig>,

    /// This node's slot in the per-run execution context
    pub state: NodeState,

    /// Cancellation token for graceful shutdown
    pub cancellation: CancellationToken,
}

impl NodeContext {
    /// Items on the `main` input, or nothing.
    pub fn main_input(&self) -> &[NodeItem] {
        self.input(MAIN_SLOT)
    }

    pub fn input(&self, slot: &str) -> &[NodeItem] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All input items across slots, slot by slot.
    pub fn all_inputs(&self) -> Vec<NodeItem> {
        self.inputs.values().flatten().cloned().collect()
    }

    /// Get required input or return error
    pub fn require_input(&self, slot: &str) -> Result<&[NodeItem], NodeError> {
        self.inputs
            .get(slot)
            .map(Vec::as_slice)
            .ok_or_else(|| NodeError::MissingInput(slot.to_string()))
    }

    /// Subnodes attached on a given slot.
    pub fn subnodes_on<'a>(&'a self, slot: &'a str) -> impl Iterator<Item = &'a SubnodeConfig> {
        self.subnodes.iter().filter(move |s| s.slot == slot)
    }
}

/// Output from node execution: named output slot to item list.
///
/// `None` or an empty list means the branch did not fire this time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeOutput {
    pub outputs: BTreeMap<String, Option<Vec<NodeItem>>>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// The implicit single `main` output.
    pub fn main(items: Vec<NodeItem>) -> Self {
        Self::new().with_output(MAIN_SLOT, items)
    }

    pub fn with_output(mut self, slot: impl Into<String>, items: Vec<NodeItem>) -> Self {
        self.outputs.insert(slot.into(), Some(items));
        self
    }

    /// Declare a slot that did not fire.
    pub fn without_output(mut self, slot: impl Into<String>) -> Self {
        self.outputs.insert(slot.into(), None);
        self
    }

    pub fn items(&self, slot: &str) -> Option<&[NodeItem]> {
        self.outputs
            .get(slot)
            .and_then(|items| items.as_deref())
            .filter(|items| !items.is_empty())
    }

    /// Slots that carry at least one item.
    pub fn fired(&self) -> impl Iterator<Item = (&str, &[NodeItem])> {
        self.outputs.iter().filter_map(|(slot, items)| match items {
            Some(items) if !items.is_empty() => Some((slot.as_str(), items.as_slice())),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fired().next().is_none()
    }

    /// Flat view for reports: `main` when it fired, otherwise every fired
    /// slot concatenated in slot order.
    pub fn primary_items(&self) -> Vec<NodeItem> {
        if let Some(items) = self.items(MAIN_SLOT) {
            return items.to_vec();
        }
        self.fired()
            .flat_map(|(_, items)| items.iter().cloned())
            .collect()
    }
}
