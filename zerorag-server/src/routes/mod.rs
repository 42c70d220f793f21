//! Route assembly and cross-cutting request plumbing.

pub mod advanced;
pub mod documents;
pub mod health;
pub mod query;

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::app::App;
use crate::error::ApiError;
use crate::rate_limit::{RateDecision, RateLimiter};

/// Build the full application router.
pub fn router(app: Arc<App>) -> Router {
    let cors = if app.config.api.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = app
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };
    let body_limit = app.config.document.max_file_size as usize + 1024 * 1024;

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/health/ping", get(health::ping))
        .route("/health/services/{name}", get(health::service_health))
        .route("/metrics", get(health::metrics))
        .route("/documents/upload", post(documents::upload))
        .route("/documents/validate", post(documents::validate))
        .route("/documents/upload/{id}/progress", get(documents::progress))
        .route("/documents", get(documents::list))
        .route(
            "/documents/{id}",
            get(documents::get_one).delete(documents::delete_one),
        )
        .route("/query", post(query::query))
        .route("/query/stream", get(query::stream))
        .route("/advanced/connections", get(advanced::list_connections))
        .route("/advanced/connections/{id}", delete(advanced::close_connection))
        .route("/advanced/cleanup", post(advanced::cleanup))
        .route("/advanced/storage/stats", get(advanced::storage_stats))
        .layer(middleware::from_fn_with_state(app.clone(), track_requests))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app)
}

/// Count every request and its outcome for the metrics endpoint.
async fn track_requests(State(app): State<Arc<App>>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    app.http_metrics.record(!response.status().is_success());
    response
}

/// Best-effort remote address: `X-Forwarded-For` first hop, else loopback.
pub(crate) fn client_ip(headers: &HeaderMap) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Enforce a rate limiter for this request, returning header material.
pub(crate) fn enforce_rate_limit(
    limiter: &RateLimiter,
    headers: &HeaderMap,
) -> Result<RateDecision, ApiError> {
    let decision = limiter.check(client_ip(headers));
    if decision.allowed {
        Ok(decision)
    } else {
        let mut err = ApiError::rate_limited(decision.reset_secs.max(1));
        err.detail = format!(
            "rate limit of {} requests/minute exceeded, retry in {}s",
            decision.limit,
            decision.reset_secs.max(1)
        );
        Err(err)
    }
}

/// Attach `X-RateLimit-*` headers to a response.
pub(crate) fn with_rate_headers(mut response: Response, decision: RateDecision) -> Response {
    let headers = response.headers_mut();
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    set("x-ratelimit-limit", decision.limit.to_string());
    set("x-ratelimit-remaining", decision.remaining.to_string());
    set("x-ratelimit-reset", decision.reset_secs.to_string());
    response
}

/// Gate mutating endpoints behind `X-API-Key` when a key is configured.
pub(crate) fn require_api_key(app: &App, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &app.config.api.api_key else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("missing or invalid API key"))
    }
}
