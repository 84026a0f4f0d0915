//! Core abstractions for the flux workflow engine
//!
//! This crate provides the data model, the node contract, the per-run
//! execution context and the event types that all other components
//! depend on. It contains no scheduling logic.

mod context;
mod error;
pub mod events;
mod item;
mod node;
mod workflow;

pub use context::{ExecutionContext, NodeState};
pub use error::{FlowError, GraphError, NodeError, NodeFailure, WorkflowError};
pub use events::*;
pub use item::{items_from_json, NodeItem};
pub use node::{Node, NodeContext, NodeOutput, SubnodeConfig};
pub use workflow::{
    Connection, ConnectionType, NodeDefinition, Position, Workflow, WorkflowId,
    WorkflowSettings, MAIN_SLOT, MAX_RETRIES,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
