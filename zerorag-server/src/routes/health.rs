//! Health, metrics, and service-info endpoints.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use zerorag_core::{Embedder as _, Generator as _};

use crate::app::App;
use crate::error::{ApiError, ApiResult};

/// `GET /` — service metadata.
pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "ZeroRAG API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Retrieval-Augmented Generation serving engine",
        "health": "/health",
        "metrics": "/metrics",
    }))
}

/// `GET /health/ping` — cheap liveness probe.
pub async fn ping() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
    }))
}

async fn service_map(app: &App) -> Value {
    let store_health = app.store.health().await;
    let embedder_up = app.embedder.health().await;
    let generator_up = app.generator.health().await;
    let documents = app.documents.stats();
    let rag = app.rag.metrics_snapshot();

    json!({
        "vector_store": {
            "status": store_health.status,
            "score": store_health.score,
            "issues": store_health.issues,
            "backend": store_health.backend,
            "backend_up": store_health.backend_up,
            "degraded": store_health.degraded,
            "memory_mb": store_health.memory_mb,
            "queue_size": store_health.queue_size,
            "points": store_health.points,
        },
        "embedder": {
            "status": if embedder_up { "healthy" } else { "unhealthy" },
            "dim": app.embedder.dim(),
        },
        "generator": {
            "status": if generator_up { "healthy" } else { "unhealthy" },
        },
        "document_pipeline": {
            "status": "healthy",
            "total_documents": documents.total_documents,
            "failed_documents": documents.failed_documents,
            "tracked_uploads": documents.tracked_uploads,
        },
        "rag_pipeline": {
            "status": if rag.success_rate >= 0.5 { "healthy" } else { "degraded" },
            "total_queries": rag.total_queries,
            "success_rate": rag.success_rate,
        },
    })
}

fn overall_status(services: &Value) -> &'static str {
    let status_of = |name: &str| {
        services
            .get(name)
            .and_then(|s| s.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
    };
    // The store going fully unhealthy takes the engine down; a dead model
    // collaborator only degrades it (fallback answers still work).
    if matches!(status_of("vector_store"), "unhealthy" | "critical") {
        return "unhealthy";
    }
    let any_degraded = ["vector_store", "embedder", "generator", "rag_pipeline"]
        .iter()
        .any(|name| matches!(status_of(name), "degraded" | "unhealthy" | "critical"));
    if any_degraded {
        "degraded"
    } else {
        "healthy"
    }
}

/// `GET /health` — aggregated service health.
pub async fn health(State(app): State<Arc<App>>) -> Json<Value> {
    let services = service_map(&app).await;
    Json(json!({
        "status": overall_status(&services),
        "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        "uptime": app.uptime_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "services": services,
    }))
}

/// `GET /health/services/{name}` — one service's health.
pub async fn service_health(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let services = service_map(&app).await;
    let service = services
        .get(&name)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("service '{name}' not found")))?;
    Ok(Json(json!({
        "service": name,
        "health": service,
        "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
    })))
}

/// `GET /metrics` — request counters and per-service statistics.
pub async fn metrics(State(app): State<Arc<App>>) -> Json<Value> {
    let total = app.http_metrics.total_requests.load(Ordering::Relaxed);
    let failed = app.http_metrics.failed_requests.load(Ordering::Relaxed);
    let success_rate =
        if total == 0 { 1.0 } else { (total - failed) as f64 / total as f64 };

    Json(json!({
        "total_requests": total,
        "failed_requests": failed,
        "success_rate": success_rate,
        "uptime": app.uptime_secs(),
        "services": {
            "vector_store": app.store.metrics_snapshot(),
            "rag_pipeline": app.rag.metrics_snapshot(),
            "documents": app.documents.stats(),
        },
        "alerts": app.store.recent_alerts(5, None),
    }))
}
