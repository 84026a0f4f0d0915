use crate::AppState;
use actix_web::{
    delete, error, get, post, put, web, HttpResponse, Responder, Result as ActixResult,
};
use fluxcore::{FlowError, Workflow, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};
use uuid::Uuid;

/// Optional body of run requests
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RunRequest {
    #[serde(default, alias = "inputData")]
    pub input_data: Value,
}

impl RunRequest {
    /// An empty body means "no input".
    pub fn from_body(body: &[u8]) -> ActixResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(error::ErrorBadRequest)
    }
}

/// Body of ad-hoc runs: an unsaved workflow plus its input
#[derive(Debug, Deserialize)]
pub(crate) struct AdhocRequest {
    pub workflow: Workflow,
    #[serde(default, alias = "inputData")]
    pub input_data: Value,
}

#[derive(Debug, Deserialize)]
struct ActiveRequest {
    active: Option<bool>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: Uuid,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

pub(crate) fn not_found(workflow_id: Uuid) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("Workflow {} not found", workflow_id),
    })
}

/// Health check endpoint
#[get("/health")]
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "fluxserver"
    }))
}

/// List all workflows
#[get("/api/workflows")]
pub async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflows: Vec<_> = data
        .runtime
        .list_workflows()
        .await
        .iter()
        .map(|w| {
            json!({
                "id": w.id,
                "name": w.name,
                "description": w.description,
                "active": w.active,
                "nodes": w.nodes.len(),
                "connections": w.connections.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflows))
}

/// Create a new workflow
#[post("/api/workflows")]
pub async fn create_workflow(
    data: web::Data<AppState>,
    workflow: web::Json<Workflow>,
) -> ActixResult<impl Responder> {
    let workflow = workflow.into_inner();
    let workflow_id = workflow.id;

    info!("Creating workflow: {} ({})", workflow.name, workflow_id);
    data.runtime.register_workflow(workflow).await;

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id: workflow_id,
        message: "Workflow created successfully".to_string(),
    }))
}

/// Get a workflow, with the port schema of every node attached
#[get("/api/workflows/{id}")]
pub async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let workflow_id = path.into_inner();
    let Some(workflow) = data.runtime.get_workflow(workflow_id).await else {
        return Ok(not_found(workflow_id));
    };

    let registry = data.runtime.registry();
    let schemas: Map<String, Value> = workflow
        .nodes
        .iter()
        .map(|node| {
            let schema = registry
                .get_metadata(&node.node_type)
                .map(|meta| {
                    json!({
                        "inputs": meta.inputs,
                        "outputs": meta.outputs,
                        "reentrant": meta.reentrant,
                    })
                })
                .unwrap_or(Value::Null);
            (node.name.clone(), schema)
        })
        .collect();

    let mut body = serde_json::to_value(&workflow).map_err(error::ErrorInternalServerError)?;
    body["nodeSchemas"] = Value::Object(schemas);
    Ok(HttpResponse::Ok().json(body))
}

/// Replace a workflow; the id in the path wins over the body
#[put("/api/workflows/{id}")]
pub async fn update_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    workflow: web::Json<Workflow>,
) -> ActixResult<HttpResponse> {
    let workflow_id = path.into_inner();
    if data.runtime.get_workflow(workflow_id).await.is_none() {
        return Ok(not_found(workflow_id));
    }

    let mut workflow = workflow.into_inner();
    workflow.id = workflow_id;
    info!("Updating workflow: {} ({})", workflow.name, workflow_id);
    data.runtime.register_workflow(workflow.clone()).await;

    Ok(HttpResponse::Ok().json(workflow))
}

/// Delete a workflow
#[delete("/api/workflows/{id}")]
pub async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let workflow_id = path.into_inner();

    match data.runtime.remove_workflow(workflow_id).await {
        Some(_) => {
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(json!({
                "message": "Workflow deleted successfully"
            })))
        }
        None => Ok(not_found(workflow_id)),
    }
}

/// Run a saved workflow and answer with the complete result
#[post("/api/workflows/{id}/run")]
pub async fn run_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    let workflow_id = path.into_inner();
    let request = RunRequest::from_body(&body)?;

    info!("Executing workflow: {}", workflow_id);

    match data
        .runtime
        .execute_workflow(workflow_id, request.input_data)
        .await
    {
        Ok(report) => {
            info!("Workflow {} finished: {:?}", workflow_id, report.status);
            Ok(HttpResponse::Ok().json(report))
        }
        Err(FlowError::Workflow(WorkflowError::NotFound(_))) => Ok(not_found(workflow_id)),
        Err(e) => {
            error!("Workflow {} execution failed: {}", workflow_id, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
    }
}

/// Run an unsaved workflow from the request body
#[post("/api/workflows/run-adhoc")]
pub async fn run_adhoc(
    data: web::Data<AppState>,
    request: web::Json<AdhocRequest>,
) -> ActixResult<impl Responder> {
    let AdhocRequest {
        workflow,
        input_data,
    } = request.into_inner();

    info!("Executing ad-hoc workflow: {}", workflow.name);
    let report = data.runtime.execute(workflow, input_data).await;
    Ok(HttpResponse::Ok().json(report))
}

/// Set or toggle the activation flag
#[post("/api/workflows/{id}/active")]
pub async fn set_active(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    let workflow_id = path.into_inner();
    let active = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<ActiveRequest>(&body)
            .map_err(error::ErrorBadRequest)?
            .active
    };

    match data.runtime.set_active(workflow_id, active).await {
        Ok(active) => Ok(HttpResponse::Ok().json(json!({
            "id": workflow_id,
            "active": active,
        }))),
        Err(_) => Ok(not_found(workflow_id)),
    }
}

/// Cancel a running execution
#[post("/api/executions/{id}/cancel")]
pub async fn cancel_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> ActixResult<HttpResponse> {
    let execution_id = path.into_inner();

    if data.runtime.cancel(execution_id).await {
        Ok(HttpResponse::Accepted().json(json!({
            "executionId": execution_id,
            "cancelled": true,
        })))
    } else {
        Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("No active execution {}", execution_id),
        }))
    }
}

/// List available node types
#[get("/api/nodes")]
pub async fn list_node_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();

    let nodes: Vec<_> = registry
        .list_node_types()
        .iter()
        .filter_map(|node_type| {
            registry.get_metadata(node_type).map(|meta| {
                json!({
                    "type": node_type,
                    "description": meta.description,
                    "category": meta.category,
                    "inputs": meta.inputs,
                    "outputs": meta.outputs,
                    "reentrant": meta.reentrant,
                })
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(nodes))
}
