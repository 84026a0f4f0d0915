//! `text/event-stream` endpoints. Each frame is `data: <event json>\n\n`;
//! a run's stream ends once its terminal event has been sent.

use crate::handlers::{not_found, AdhocRequest, RunRequest};
use crate::AppState;
use actix_web::{get, http::header, post, web, HttpResponse, Result as ActixResult};
use fluxcore::ExecutionEvent;
use fluxruntime::{to_sse_frame, RunHandle};
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

fn frame(event: &ExecutionEvent) -> Option<Result<web::Bytes, Infallible>> {
    match to_sse_frame(event) {
        Ok(frame) => Some(Ok(web::Bytes::from(frame))),
        Err(e) => {
            warn!("Dropping unserializable event {:?}: {}", event.kind, e);
            None
        }
    }
}

fn event_stream_response() -> actix_web::HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    builder
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"));
    builder
}

/// Stream one run. The run itself is detached from the response: a client
/// that goes away only closes its own feed.
fn run_stream(handle: RunHandle) -> HttpResponse {
    let execution_id = handle.execution_id;
    let events = UnboundedReceiverStream::new(handle.events).filter_map(|event| frame(&event));

    event_stream_response()
        .insert_header(("X-Execution-Id", execution_id.to_string()))
        .streaming(events)
}

#[post("/execution-stream/adhoc")]
pub async fn stream_adhoc(
    data: web::Data<AppState>,
    request: web::Json<AdhocRequest>,
) -> ActixResult<HttpResponse> {
    let AdhocRequest {
        workflow,
        input_data,
    } = request.into_inner();

    info!("Streaming ad-hoc workflow: {}", workflow.name);
    let handle = data.runtime.start(workflow, input_data).await;
    Ok(run_stream(handle))
}

#[post("/execution-stream/{id}")]
pub async fn stream_workflow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    let workflow_id = path.into_inner();
    let request = RunRequest::from_body(&body)?;

    let Some(workflow) = data.runtime.get_workflow(workflow_id).await else {
        return Ok(not_found(workflow_id));
    };

    info!("Streaming workflow: {}", workflow_id);
    let handle = data.runtime.start(workflow, request.input_data).await;
    Ok(run_stream(handle))
}

/// Events of every run, for dashboards. Slow readers skip what they missed.
#[get("/api/events")]
pub async fn event_feed(data: web::Data<AppState>) -> HttpResponse {
    let events = BroadcastStream::new(data.runtime.subscribe_events()).filter_map(
        |received| match received {
            Ok(event) => frame(&event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Event feed subscriber lagged, {} events skipped", skipped);
                None
            }
        },
    );

    event_stream_response().streaming(events)
}
