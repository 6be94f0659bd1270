//! HTTP surface over a shared [`Kernel`].

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use crate::{
    agent::{CompletionAgent, RunOutcome},
    dispatch::WorkerPool,
    error::KernelError,
    evaluation::Aggregate,
    kernel::{Kernel, KernelStatus},
    middleware::{
        create_body_limit_layer, create_cors_layer, create_rate_limiter, logging_middleware,
        rate_limit_middleware, security_headers_middleware, AppRateLimiter,
    },
    scheduler::Task,
    settings::{ServerConfig, Settings},
};

/// Agent registered by [`bootstrap_kernel`] so a fresh server can answer runs.
pub const DEFAULT_AGENT: &str = "assistant";
const DEFAULT_AGENT_ROLE: &str = "operator";

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<Kernel>,
    pub rate_limiter: Arc<AppRateLimiter>,
    pub server: ServerConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(kernel: Arc<Kernel>, server: &ServerConfig) -> Self {
        Self {
            kernel,
            rate_limiter: create_rate_limiter(server),
            server: server.clone(),
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub agent_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub agent: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Deserialize)]
pub struct RunAgentRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleWorkflowRequest {
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Error body plus status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        let status = match &err {
            KernelError::NotFound { .. } => StatusCode::NOT_FOUND,
            KernelError::Template(_) | KernelError::InvalidTask(_) => StatusCode::BAD_REQUEST,
            KernelError::Provider(_) => StatusCode::BAD_GATEWAY,
            KernelError::Cancelled { .. } | KernelError::Dispatch(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            KernelError::Configuration(_) | KernelError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Create the HTTP router with all endpoints and middleware
pub fn create_router(state: AppState) -> Router {
    let cors_layer = create_cors_layer(&state.server);
    let body_limit_layer = create_body_limit_layer(state.server.max_request_size_mb);

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/tasks", post(submit_task))
        .route("/agents/:name/run", post(run_agent))
        .route("/workflows/:name/schedule", post(schedule_workflow))
        .route("/evaluation/report", get(evaluation_report))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(cors_layer)
        .layer(body_limit_layer)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        agent_count: state.kernel.agent_names().len(),
    })
}

async fn status(State(state): State<AppState>) -> Json<KernelStatus> {
    Json(state.kernel.status())
}

/// Queue a task without waiting for it.
#[instrument(skip(state, request))]
async fn submit_task(
    State(state): State<AppState>,
    request: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(request) = request?;
    if !state.kernel.has_agent(&request.agent) {
        return Err(KernelError::not_found("agent", request.agent).into());
    }

    let task = state
        .kernel
        .submit_task(&request.agent, request.payload, request.priority);
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// Kernel-mediated run: waits for the outcome. Denials answer 403.
#[instrument(skip(state, request))]
async fn run_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request: Result<Json<RunAgentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RunOutcome>), ApiError> {
    let Json(request) = request?;
    let outcome = state.kernel.run(&name, &request.prompt, request.options).await?;

    let status = if outcome.is_denied() {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

#[instrument(skip(state, request))]
async fn schedule_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request: Result<Json<ScheduleWorkflowRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<Task>>), ApiError> {
    let Json(request) = request?;
    let tasks = state.kernel.schedule_workflow(&name, &request.variables)?;
    Ok((StatusCode::ACCEPTED, Json(tasks)))
}

async fn evaluation_report(State(state): State<AppState>) -> Json<BTreeMap<String, Aggregate>> {
    Json(state.kernel.evaluation_report())
}

/// Build the kernel described by `settings` with the default agent registered.
pub fn bootstrap_kernel(settings: &Settings) -> Result<Kernel> {
    let kernel = Kernel::new(settings.kernel.clone()).context("Failed to initialize kernel")?;
    kernel.register_agent(CompletionAgent::shared(DEFAULT_AGENT), DEFAULT_AGENT_ROLE);
    Ok(kernel)
}

/// Start the kernel, its worker pool and the HTTP server; return on shutdown.
pub async fn serve(settings: &Settings) -> Result<()> {
    let kernel = Arc::new(bootstrap_kernel(settings)?);
    let pool = WorkerPool::start(kernel.clone(), settings.kernel.workers);

    let app = create_router(AppState::new(kernel.clone(), &settings.server));

    let addr = settings.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await;

    pool.shutdown().await;
    kernel.shutdown();
    result.context("HTTP server error")?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
