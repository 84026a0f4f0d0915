//! Workflow execution runtime
//!
//! This crate turns a workflow into a validated plan, runs it round by round
//! with per-run state, routes named outputs downstream and streams an ordered
//! event feed of everything that happens.

mod executor;
mod registry;
mod resolver;
mod router;
mod runner;
mod runtime;
mod streamer;

pub use executor::{NodeExecutor, NodeRun};
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry, PortDefinition};
pub use resolver::{ExecutionPlan, GraphResolver, PlannedNode, Route};
pub use router::{Delivery, OutputRouter};
pub use runner::{RunHandle, WorkflowRunner};
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use streamer::{
    collect_report, to_sse_frame, ExecutionReport, ExecutionStreamer, ReportCollector,
};
