//! HTTP middleware: rate limiting, body size limit, CORS, security headers
//! and request logging.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde_json::json;
use std::{num::NonZeroU32, sync::Arc, time::Instant};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};
use tracing::{info, warn};

use crate::settings::ServerConfig;

/// Rate limiter type
pub type AppRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Global rate limiter. A zero limit is treated as one request per minute;
/// `Settings::validate` rejects it before the server gets here.
pub fn create_rate_limiter(config: &ServerConfig) -> Arc<AppRateLimiter> {
    let per_minute = NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Answers 429 with a JSON error once the shared budget is spent.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<AppRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.check().is_err() {
        warn!(
            "Rejected {} {}: request budget exhausted",
            request.method(),
            request.uri().path()
        );
        let body = Json(json!({ "error": "rate limit exceeded" }));
        return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    }
    next.run(request).await
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));

    response
}

/// CORS layer. When CORS is disabled only same-origin requests are allowed.
pub fn create_cors_layer(config: &ServerConfig) -> CorsLayer {
    if !config.enable_cors {
        return CorsLayer::new();
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    if config.cors_origins.iter().any(|origin| origin == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Create request body size limit layer
pub fn create_body_limit_layer(max_size_mb: usize) -> RequestBodyLimitLayer {
    RequestBodyLimitLayer::new(max_size_mb * 1024 * 1024)
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();
    if status.is_client_error() || status.is_server_error() {
        warn!("{} {} -> {} ({} ms)", method, uri, status, elapsed_ms);
    } else {
        info!("{} {} -> {} ({} ms)", method, uri, status, elapsed_ms);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    fn limited(per_minute: u32) -> Router {
        let config = ServerConfig {
            rate_limit_per_minute: per_minute,
            ..Default::default()
        };
        Router::new()
            .route("/status", get(|| async { "ok" }))
            .layer(from_fn_with_state(create_rate_limiter(&config), rate_limit_middleware))
    }

    async fn status_of(app: &Router) -> Response {
        let request = http::Request::builder()
            .uri("/status")
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_exhausted_budget_answers_429() {
        let app = limited(2);
        assert_eq!(status_of(&app).await.status(), StatusCode::OK);
        assert_eq!(status_of(&app).await.status(), StatusCode::OK);

        let response = status_of(&app).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "rate limit exceeded");
    }

    #[tokio::test]
    async fn test_zero_rate_limit_still_admits_one_request() {
        let app = limited(0);
        assert_eq!(status_of(&app).await.status(), StatusCode::OK);
        assert_eq!(status_of(&app).await.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
