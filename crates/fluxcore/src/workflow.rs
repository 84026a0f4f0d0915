use crate::NodeItem;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Highest accepted value for `retryOnFail`.
pub const MAX_RETRIES: u32 = 10;

pub const MAIN_SLOT: &str = "main";

/// Complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            active: false,
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeDefinition) -> String {
        let name = node.name.clone();
        self.nodes.push(node);
        name
    }

    /// Normal connection between the `main` slots of two nodes.
    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.connect_slots(source, MAIN_SLOT, target, MAIN_SLOT);
    }

    pub fn connect_slots(
        &mut self,
        source: impl Into<String>,
        source_output: impl Into<String>,
        target: impl Into<String>,
        target_input: impl Into<String>,
    ) {
        self.connections.push(Connection {
            source_node: source.into(),
            source_output: source_output.into(),
            target_node: target.into(),
            target_input: target_input.into(),
            connection_type: ConnectionType::Normal,
        });
    }

    /// Attach `subnode` as configuration of `parent` on the given slot.
    pub fn attach_subnode(
        &mut self,
        subnode: impl Into<String>,
        parent: impl Into<String>,
        slot: impl Into<String>,
    ) {
        self.connections.push(Connection {
            source_node: subnode.into(),
            source_output: MAIN_SLOT.to_string(),
            target_node: parent.into(),
            target_input: slot.into(),
            connection_type: ConnectionType::Subnode,
        });
    }

    pub fn find_node(&self, name: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Node declaration inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub continue_on_fail: bool,
    #[serde(default)]
    pub retry_on_fail: u32,
    #[serde(default)]
    pub retry_delay: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_data: Option<Vec<NodeItem>>,
    /// Editor-only; never read by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl NodeDefinition {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            parameters: HashMap::new(),
            continue_on_fail: false,
            retry_on_fail: 0,
            retry_delay: 0,
            pinned_data: None,
            position: None,
        }
    }

    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn with_retry(mut self, retries: u32, delay_ms: u64) -> Self {
        self.retry_on_fail = retries;
        self.retry_delay = delay_ms;
        self
    }

    pub fn continue_on_fail(mut self, enabled: bool) -> Self {
        self.continue_on_fail = enabled;
        self
    }

    pub fn with_pinned_data(mut self, items: Vec<NodeItem>) -> Self {
        self.pinned_data = Some(items);
        self
    }

    /// Retry count clamped to the accepted range.
    pub fn max_retries(&self) -> u32 {
        self.retry_on_fail.min(MAX_RETRIES)
    }
}

fn main_slot() -> String {
    MAIN_SLOT.to_string()
}

/// Connection between nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source_node: String,
    #[serde(default = "main_slot")]
    pub source_output: String,
    pub target_node: String,
    #[serde(default = "main_slot")]
    pub target_input: String,
    #[serde(default)]
    pub connection_type: ConnectionType,
}

impl Connection {
    pub fn is_subnode(&self) -> bool {
        self.connection_type == ConnectionType::Subnode
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Normal,
    Subnode,
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Per-workflow overrides of runtime limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_nodes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_ms: Option<u64>,
}
