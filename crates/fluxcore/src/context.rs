use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-run state store keyed by node name.
///
/// Created empty when a run starts and dropped when it ends. Looping and
/// batching node types use it to remember progress across their own
/// re-entries; two different nodes never share a key.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    states: Arc<RwLock<HashMap<String, Value>>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, node_name: &str) -> Option<Value> {
        self.states.read().await.get(node_name).cloned()
    }

    pub async fn set(&self, node_name: impl Into<String>, state: Value) {
        self.states.write().await.insert(node_name.into(), state);
    }

    pub async fn delete(&self, node_name: &str) -> Option<Value> {
        self.states.write().await.remove(node_name)
    }

    pub async fn contains(&self, node_name: &str) -> bool {
        self.states.read().await.contains_key(node_name)
    }

    /// Names of every node currently holding state.
    pub async fn keys(&self) -> Vec<String> {
        self.states.read().await.keys().cloned().collect()
    }

    /// View of the store restricted to one node's key.
    pub fn scoped(&self, node_name: impl Into<String>) -> NodeState {
        NodeState {
            node_name: node_name.into(),
            context: self.clone(),
        }
    }
}

/// A node's own slot in the run's [`ExecutionContext`].
#[derive(Clone)]
pub struct NodeState {
    node_name: String,
    context: ExecutionContext,
}

impl NodeState {
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub async fn get(&self) -> Option<Value> {
        self.context.get(&self.node_name).await
    }

    pub async fn set(&self, state: Value) {
        self.context.set(self.node_name.clone(), state).await
    }

    pub async fn clear(&self) -> Option<Value> {
        self.context.delete(&self.node_name).await
    }
}
