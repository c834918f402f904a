//! HTTP surface driven in-process through the router

use super::test_utils::{app_state, app_state_with, fast_retry, frame_types, sse_frames, TEST_TTL};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use genstream::decoder::DecodedPayload;
use genstream::error::ApiError;
use genstream::jobs::{JobParams, JobRegistry, JobState};
use genstream::orchestrator::{ArtifactRenderer, Orchestrator, PassthroughRenderer};
use genstream::provider::{
    OutputItem, ProviderResponse, ProviderWireEvent, ScriptedCall, ScriptedProvider,
};
use genstream::resilience::ResilientCaller;
use genstream::server::{router, AppState};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(state, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_until_running(state: &Arc<AppState>, job_id: &str) {
    for _ in 0..400 {
        if state.registry.get_job(job_id).map(|job| job.state) == Some(JobState::Running) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never started running", job_id);
}

/// Start streaming a job on its own task; resolves to the full response body.
fn spawn_stream(state: &Arc<AppState>, job_id: &str) -> tokio::task::JoinHandle<Vec<u8>> {
    let state = state.clone();
    let uri = format!("/api/jobs/{}/stream", job_id);
    tokio::spawn(async move { send(&state, get(&uri)).await.1 })
}

/// Renderer that blocks its thread for a while, so a run cannot finish promptly.
struct StallingRenderer {
    entered: Arc<AtomicBool>,
    stall: Duration,
}

impl ArtifactRenderer for StallingRenderer {
    fn render(&self, payload: &DecodedPayload, params: &JobParams) -> Result<Value, ApiError> {
        self.entered.store(true, Ordering::SeqCst);
        std::thread::sleep(self.stall);
        PassthroughRenderer.render(payload, params)
    }
}

async fn create(state: &Arc<AppState>) -> String {
    let (status, body) = send_json(
        state,
        post_json("/api/jobs", json!({"prompt": "Say hi", "model": "gpt-4.1-mini"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "queued");
    let job_id = body["jobId"].as_str().unwrap().to_string();
    assert_eq!(body["streamUrl"], format!("/api/jobs/{}/stream", job_id));
    job_id
}

#[tokio::test]
async fn test_create_then_stream_emits_ordered_frames() {
    let (state, _) = app_state(ScriptedProvider::new(vec![ScriptedCall::text_response(&[
        "Hi", " there",
    ])]));
    let job_id = create(&state).await;

    let response = router(state.clone())
        .oneshot(get(&format!("/api/jobs/{}/stream", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let frames = sse_frames(&body);
    assert_eq!(
        frame_types(&frames),
        vec!["step", "step", "chunk", "chunk", "step", "metadata", "complete"]
    );
    assert_eq!(frames[0]["step"], "Prompting");
    assert_eq!(frames[1]["step"], "Generating");
    assert_eq!(frames[2]["content"], "Hi");
    assert_eq!(frames[4]["step"], "Validating");
    assert!(frames[5]["tokens"]["totalTokens"].as_u64().unwrap() > 0);
    assert!(frames[5]["cost"].is_number());
    assert_eq!(frames[6]["result"], json!({"text": "Hi there"}));

    let (status, job) = send_json(&state, get(&format!("/api/jobs/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["jobId"], job_id.as_str());
    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"], json!({"text": "Hi there"}));
    assert_eq!(job["phase"], "Complete");
    assert!(job.get("reasoning").is_none());
    assert!(job.get("createdAt").is_some());
    assert!(job.get("updatedAt").is_some());
}

#[tokio::test]
async fn test_cancel_before_stream_yields_single_cancelled_frame() {
    let (state, provider) = app_state(ScriptedProvider::new(vec![ScriptedCall::text_response(
        &["unused"],
    )]));
    let job_id = create(&state).await;

    let cancel_uri = format!("/api/jobs/{}/cancel", job_id);
    let (status, body) = send_json(&state, post_json(&cancel_uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["jobId"], job_id.as_str());

    let (_, again) = send_json(&state, post_json(&cancel_uri, json!({}))).await;
    assert_eq!(again["success"], false);

    let (_, body) = send(&state, get(&format!("/api/jobs/{}/stream", job_id))).await;
    let frames = sse_frames(&body);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[0]["code"], "cancelled");
    assert_eq!(provider.attempts(), 0);

    let (_, job) = send_json(&state, get(&format!("/api/jobs/{}", job_id))).await;
    assert_eq!(job["status"], "cancelled");
}

#[tokio::test]
async fn test_unknown_job_stream_terminates_with_not_found() {
    let (state, _) = app_state(ScriptedProvider::new(Vec::new()));
    let (status, body) = send(&state, get("/api/jobs/missing/stream")).await;
    assert_eq!(status, StatusCode::OK);
    let frames = sse_frames(&body);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "error");
    assert_eq!(frames[0]["code"], "not_found");
}

#[tokio::test]
async fn test_unknown_job_status_and_cancel() {
    let (state, _) = app_state(ScriptedProvider::new(Vec::new()));

    let (status, body) = send_json(&state, get("/api/jobs/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) =
        send_json(&state, post_json("/api/jobs/missing/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_invalid_create_requests_are_rejected() {
    let (state, _) = app_state(ScriptedProvider::new(Vec::new()));

    let (status, body) =
        send_json(&state, post_json("/api/jobs", json!({"prompt": "", "model": "m"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = send_json(&state, post_json("/api/jobs", json!({"model": "m"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_structured_job_over_http() {
    let (state, _) = app_state(ScriptedProvider::new(vec![ScriptedCall::structured_response(
        "fc_1",
        "emit_tags",
        &["{\"tags\":[\"a\",", "\"b\"]}"],
    )]));
    let (status, body) = send_json(
        &state,
        post_json(
            "/api/jobs",
            json!({
                "prompt": "Tag this",
                "model": "gpt-4.1",
                "temperature": 0.2,
                "schema": {
                    "name": "emit_tags",
                    "schema": {
                        "type": "object",
                        "properties": {"tags": {"type": "array", "items": {"type": "string"}}},
                        "required": ["tags"]
                    }
                }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let (_, body) = send(&state, get(&format!("/api/jobs/{}/stream", job_id))).await;
    let frames = sse_frames(&body);
    let last = frames.last().unwrap();
    assert_eq!(last["type"], "complete");
    assert_eq!(last["result"], json!({"tags": ["a", "b"]}));
    let chunks: String = frames
        .iter()
        .filter(|frame| frame["type"] == "chunk")
        .map(|frame| frame["content"].as_str().unwrap())
        .collect();
    assert_eq!(chunks, "{\"tags\":[\"a\",\"b\"]}");
}

#[tokio::test]
async fn test_health_reports_job_counts() {
    let (state, _) = app_state(ScriptedProvider::new(Vec::new()));
    create(&state).await;
    create(&state).await;

    let (status, body) = send_json(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider"], "scripted");
    assert_eq!(body["jobs"]["queued"], 2);
    assert_eq!(body["jobs"]["total"], 2);
}

#[tokio::test]
async fn test_cancel_running_job_reports_cleanup() {
    let parts: Vec<String> = (0..50).map(|i| format!("part{} ", i)).collect();
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
    let (state, _) = app_state(
        ScriptedProvider::new(vec![ScriptedCall::text_response(&parts)])
            .with_event_delay(Duration::from_millis(20)),
    );
    let job_id = create(&state).await;
    let streaming = spawn_stream(&state, &job_id);
    wait_until_running(&state, &job_id).await;

    let cancel_uri = format!("/api/jobs/{}/cancel", job_id);
    let (status, body) = send_json(&state, post_json(&cancel_uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Job cancelled");
    assert_eq!(body["jobId"], job_id.as_str());
    // The run is already unregistered by the time the response arrives.
    assert!(
        state
            .registry
            .wait_for_cleanup(&job_id, Duration::from_millis(1))
            .await
    );

    let frames = sse_frames(&streaming.await.unwrap());
    let last = frames.last().unwrap();
    assert_eq!(last["type"], "error");
    assert_eq!(last["code"], "cancelled");
    assert!(frames.iter().filter(|frame| frame["type"] == "chunk").count() < 50);

    let (_, job) = send_json(&state, get(&format!("/api/jobs/{}", job_id))).await;
    assert_eq!(job["status"], "cancelled");
    assert_eq!(job["phase"], "Generating");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_reports_run_still_shutting_down() {
    let entered = Arc::new(AtomicBool::new(false));
    let orchestrator = Orchestrator::new(
        Arc::new(JobRegistry::new(TEST_TTL)),
        Arc::new(ScriptedProvider::new(vec![ScriptedCall::text_response(&["slow"])])),
        ResilientCaller::new(fast_retry(1), None),
    )
    .with_renderer(Arc::new(StallingRenderer {
        entered: entered.clone(),
        stall: Duration::from_millis(400),
    }));
    let state = app_state_with(Arc::new(orchestrator), Duration::from_millis(20));
    let job_id = create(&state).await;
    let streaming = spawn_stream(&state, &job_id);

    while !entered.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let cancel_uri = format!("/api/jobs/{}/cancel", job_id);
    let (status, body) = send_json(&state, post_json(&cancel_uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["message"],
        "Job cancelled; generation is still shutting down"
    );

    let frames = sse_frames(&streaming.await.unwrap());
    assert_eq!(frames.last().unwrap()["code"], "cancelled");
    assert!(
        state
            .registry
            .wait_for_cleanup(&job_id, Duration::from_secs(2))
            .await
    );
}

#[tokio::test]
async fn test_status_reports_reasoning() {
    let (state, _) = app_state(ScriptedProvider::new(vec![ScriptedCall::Respond(vec![
        ProviderWireEvent::TextDelta("42".to_string()),
        ProviderWireEvent::Completed(ProviderResponse {
            output: vec![
                OutputItem::Reasoning("Counted carefully".to_string()),
                OutputItem::Text("42".to_string()),
            ],
            ..ProviderResponse::default()
        }),
    ])]));
    let job_id = create(&state).await;
    send(&state, get(&format!("/api/jobs/{}/stream", job_id))).await;

    let (status, job) = send_json(&state, get(&format!("/api/jobs/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["result"], json!({"text": "42"}));
    assert_eq!(job["reasoning"], "Counted carefully");
}
