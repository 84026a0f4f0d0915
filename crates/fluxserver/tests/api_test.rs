use actix_web::{http::StatusCode, test, web, App};
use fluxruntime::RuntimeConfig;
use fluxserver::{build_runtime, configure, AppState};
use serde_json::{json, Value};

macro_rules! app {
    () => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(build_runtime(
                    RuntimeConfig::default(),
                ))))
                .configure(configure),
        )
        .await
    };
}

/// POST a workflow and return its id.
macro_rules! create {
    ($app:expr, $workflow:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json($workflow)
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        body["id"].as_str().unwrap().to_string()
    }};
}

fn branching_workflow() -> Value {
    json!({
        "name": "branching",
        "nodes": [
            {"name": "Start", "type": "trigger.manual"},
            {"name": "If", "type": "flow.if", "parameters": {"field": "amount", "operation": "gt", "value": 100}},
            {"name": "A", "type": "debug.log"},
            {"name": "B", "type": "debug.log"}
        ],
        "connections": [
            {"sourceNode": "Start", "targetNode": "If"},
            {"sourceNode": "If", "sourceOutput": "true", "targetNode": "A"},
            {"sourceNode": "If", "sourceOutput": "false", "targetNode": "B"}
        ]
    })
}

/// Parse `data: <json>` frames out of an event-stream body.
fn frames(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(|json| serde_json::from_str(json).unwrap())
        .collect()
}

#[actix_web::test]
async fn test_health() {
    let app = app!();
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
}

#[actix_web::test]
async fn test_workflow_crud() {
    let app = app!();
    let id = create!(app, branching_workflow());

    let req = test::TestRequest::get().uri(&format!("/api/workflows/{}", id)).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["name"], "branching");
    assert_eq!(body["nodeSchemas"]["If"]["outputs"][0]["name"], "true");
    assert_eq!(body["nodeSchemas"]["Start"]["inputs"], json!([]));

    let req = test::TestRequest::get().uri("/api/workflows").to_request();
    let list: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["nodes"], 4);

    let mut updated = branching_workflow();
    updated["name"] = json!("renamed");
    let req = test::TestRequest::put()
        .uri(&format!("/api/workflows/{}", id))
        .set_json(updated)
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["name"], "renamed");

    let req = test::TestRequest::delete().uri(&format!("/api/workflows/{}", id)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri(&format!("/api/workflows/{}", id)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_run_saved_workflow() {
    let app = app!();
    let id = create!(app, branching_workflow());

    let req = test::TestRequest::post()
        .uri(&format!("/api/workflows/{}/run", id))
        .set_json(json!({"input_data": {"amount": 150}}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["data"]["A"][0]["json"]["amount"], 150);
    assert!(body["data"].get("B").is_none());
    assert_eq!(body["errors"], json!([]));
}

#[actix_web::test]
async fn test_run_without_body_and_unknown_workflow() {
    let app = app!();
    let id = create!(app, branching_workflow());

    let req = test::TestRequest::post()
        .uri(&format!("/api/workflows/{}/run", id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "succeeded");
    assert!(body["data"].get("B").is_some());

    let req = test::TestRequest::post()
        .uri(&format!("/api/workflows/{}/run", uuid::Uuid::new_v4()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_run_adhoc() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/api/workflows/run-adhoc")
        .set_json(json!({"workflow": branching_workflow(), "input_data": {"amount": 1}}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["data"]["B"][0]["json"]["amount"], 1);
}

#[actix_web::test]
async fn test_stream_adhoc_emits_ordered_frames() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/execution-stream/adhoc")
        .set_json(json!({"workflow": branching_workflow(), "input_data": {"amount": 500}}))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "text/event-stream"
    );
    assert!(resp.headers().contains_key("x-execution-id"));

    let events = frames(&test::read_body(resp).await);
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types.first(), Some(&"execution:start"));
    assert_eq!(&types[types.len() - 2..], &["execution:result", "execution:complete"]);
    assert_eq!(types.iter().filter(|t| **t == "node:complete").count(), 3);

    let execution_id = &events[0]["executionId"];
    assert!(events.iter().all(|e| &e["executionId"] == execution_id));
    assert_eq!(events.last().unwrap()["progress"], json!({"completed": 3, "total": 4}));
}

#[actix_web::test]
async fn test_stream_saved_workflow() {
    let app = app!();
    let id = create!(app, branching_workflow());

    let req = test::TestRequest::post()
        .uri(&format!("/execution-stream/{}", id))
        .set_json(json!({"input_data": {"amount": 101}}))
        .to_request();
    let events = frames(&test::call_and_read_body(&app, req).await);

    let completed: Vec<&str> = events
        .iter()
        .filter(|e| e["type"] == "node:complete")
        .map(|e| e["nodeName"].as_str().unwrap())
        .collect();
    assert_eq!(completed, vec!["Start", "If", "A"]);
}

#[actix_web::test]
async fn test_stream_invalid_workflow_sends_single_error() {
    let app = app!();
    let workflow = json!({
        "nodes": [
            {"name": "a", "type": "debug.log"},
            {"name": "b", "type": "debug.log"}
        ],
        "connections": [
            {"sourceNode": "a", "targetNode": "b"},
            {"sourceNode": "b", "targetNode": "a"}
        ]
    });
    let req = test::TestRequest::post()
        .uri("/execution-stream/adhoc")
        .set_json(json!({"workflow": workflow}))
        .to_request();
    let events = frames(&test::call_and_read_body(&app, req).await);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "execution:error");
    assert_eq!(events[0]["status"], "failed");
}

#[actix_web::test]
async fn test_toggle_active() {
    let app = app!();
    let id = create!(app, branching_workflow());
    let uri = format!("/api/workflows/{}/active", id);

    let req = test::TestRequest::post().uri(&uri).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["active"], true);

    let req = test::TestRequest::post().uri(&uri).set_json(json!({"active": true})).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["active"], true);

    let req = test::TestRequest::post().uri(&uri).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["active"], false);
}

#[actix_web::test]
async fn test_cancel_unknown_execution() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri(&format!("/api/executions/{}/cancel", uuid::Uuid::new_v4()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_list_node_types() {
    let app = app!();
    let req = test::TestRequest::get().uri("/api/nodes").to_request();
    let nodes: Value = test::call_and_read_body_json(&app, req).await;

    let batches = nodes
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["type"] == "flow.split_in_batches")
        .unwrap();
    assert_eq!(batches["reentrant"], true);
    assert_eq!(batches["category"], "flow");
}
