//! HTTP boundary of the flux engine: REST endpoints for workflows and
//! runs, plus `text/event-stream` execution feeds.

mod config;
mod handlers;
mod stream;

pub use config::ServerConfig;

use actix_web::web;
use fluxruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use std::sync::Arc;

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<FlowRuntime>,
}

impl AppState {
    pub fn new(runtime: FlowRuntime) -> Self {
        Self {
            runtime: Arc::new(runtime),
        }
    }
}

/// Runtime with every standard node registered
pub fn build_runtime(config: RuntimeConfig) -> FlowRuntime {
    let mut registry = NodeRegistry::new();
    fluxnodes::register_all(&mut registry);
    FlowRuntime::with_registry(Arc::new(registry), config)
}

/// Mount every route. Literal paths are registered before their
/// `{id}` siblings so they are matched first.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::health_check)
        .service(handlers::list_workflows)
        .service(handlers::create_workflow)
        .service(handlers::run_adhoc)
        .service(handlers::get_workflow)
        .service(handlers::update_workflow)
        .service(handlers::delete_workflow)
        .service(handlers::run_workflow)
        .service(handlers::set_active)
        .service(handlers::cancel_execution)
        .service(handlers::list_node_types)
        .service(stream::stream_adhoc)
        .service(stream::stream_workflow)
        .service(stream::event_feed);
}
