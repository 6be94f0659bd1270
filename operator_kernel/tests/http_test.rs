//! HTTP surface tests driven through the router with `tower::ServiceExt`.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use operator_kernel::{
    agent::CompletionAgent,
    gateway::FnProvider,
    kernel::KernelConfig,
    scheduler::SchedulerPolicy,
    server::{bootstrap_kernel, create_router, AppState, DEFAULT_AGENT},
    settings::Settings,
    workflow::WorkflowStep,
    Kernel,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use tracing_test::traced_test;

fn app_with(kernel: Kernel) -> (Router, Arc<Kernel>) {
    let kernel = Arc::new(kernel);
    let settings = Settings::default();
    (create_router(AppState::new(kernel.clone(), &settings.server)), kernel)
}

fn app() -> (Router, Arc<Kernel>) {
    app_with(bootstrap_kernel(&Settings::default()).unwrap())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
#[traced_test]
async fn test_health_and_status() {
    let (app, _) = app();

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["agent_count"], 1);

    let (status, body) = send(&app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployment_mode"], "local");
    assert_eq!(body["compute_resources"]["primary"], "local CPU/GPU");
    assert_eq!(body["scheduler"]["policy"], "fifo");
    assert_eq!(body["agents"], json!([DEFAULT_AGENT]));
}

#[tokio::test]
async fn test_run_agent_and_report() {
    let (app, _) = app();

    let (status, body) = send(
        &app,
        "POST",
        "/agents/assistant/run",
        Some(json!({"prompt": "list the data retention rules"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["provider"], "mock");

    let (status, body) = send(&app, "GET", "/evaluation/report", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["assistant"]["context_relevance"].as_f64().unwrap() > 0.0);
    assert_eq!(body["assistant"]["correctness"], Value::Null);

    let (_, body) = send(&app, "GET", "/status", None).await;
    assert_eq!(body["scheduler"]["completed_tasks"], 1);
    assert_eq!(body["active_sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_agent_is_404() {
    let (app, _) = app();
    let (status, body) =
        send(&app, "POST", "/agents/ghost/run", Some(json!({"prompt": "hi"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "agent 'ghost' not found");

    let (status, _) = send(&app, "POST", "/tasks", Some(json!({"agent": "ghost"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_denial_is_403_with_structured_body() {
    let kernel = bootstrap_kernel(&Settings::default()).unwrap();
    kernel.register_agent(CompletionAgent::shared("viewer"), "read_only");
    let (app, kernel) = app_with(kernel);

    let (status, body) =
        send(&app, "POST", "/agents/viewer/run", Some(json!({"prompt": "hi"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["status"], "denied");
    assert_eq!(body["tool"], "llm_complete");
    assert_eq!(body["role"], "read_only");
    assert_eq!(kernel.access().audit_log().len(), 1);
}

#[tokio::test]
async fn test_bad_payload_is_400() {
    let (app, _) = app();
    let body = json!({"text": "no prompt"});
    let (status, body) = send(&app, "POST", "/agents/assistant/run", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_provider_failure_is_502() {
    let kernel = bootstrap_kernel(&Settings::default()).unwrap();
    kernel.register_provider(
        "backend",
        FnProvider::shared(|_, _| Err(anyhow::anyhow!("upstream timeout"))),
        true,
    );
    let (app, _) = app_with(kernel);

    let (status, body) =
        send(&app, "POST", "/agents/assistant/run", Some(json!({"prompt": "hi"}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "upstream timeout");
}

#[tokio::test]
async fn test_submitted_task_waits_in_queue() {
    let config = KernelConfig::default().with_policy(SchedulerPolicy::Priority);
    let kernel = Kernel::new(config).unwrap();
    kernel.register_agent(CompletionAgent::shared("assistant"), "operator");
    let (app, kernel) = app_with(kernel);

    let (status, body) = send(
        &app,
        "POST",
        "/tasks",
        Some(json!({"agent": "assistant", "payload": {"prompt": "later"}, "priority": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["priority"], 7);

    let (_, body) = send(&app, "GET", "/status", None).await;
    assert_eq!(body["scheduler"]["queued_tasks"], 1);

    let done = kernel.drain().await;
    assert_eq!(done[0].result.as_ref().unwrap()["response"], "[mock response to: later]");
}

#[tokio::test]
async fn test_schedule_workflow_route() {
    let (app, kernel) = app();
    kernel
        .define_workflow("digest", vec![WorkflowStep::new(DEFAULT_AGENT, "Digest {topic}")])
        .unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/workflows/digest/schedule",
        Some(json!({"variables": {"topic": "consent"}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body[0]["payload"]["prompt"], "Digest consent");

    let (status, body) = send(&app, "POST", "/workflows/digest/schedule", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("topic"));

    let (status, _) = send(&app, "POST", "/workflows/missing/schedule", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_security_headers_present() {
    let (app, _) = app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}
