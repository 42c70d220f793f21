//! Maintenance endpoints: streaming sessions, cleanup, storage stats.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use zerorag_core::ingest::{CleanupReport, CleanupRequest};

use crate::app::App;
use crate::connections::StreamConnection;
use crate::error::{ApiError, ApiResult};
use crate::routes::require_api_key;

/// `GET /advanced/connections` — active streaming sessions.
pub async fn list_connections(
    State(app): State<Arc<App>>,
) -> Json<Vec<StreamConnection>> {
    Json(app.connections.list())
}

/// `DELETE /advanced/connections/{id}` — ask a streaming session to close.
pub async fn close_connection(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_api_key(&app, &headers)?;
    if !app.connections.request_close(&id) {
        return Err(ApiError::not_found(format!("connection '{id}' not found")));
    }
    Ok(Json(json!({ "message": format!("connection {id} closing") })))
}

/// `POST /advanced/cleanup` — remove documents and stale upload records.
/// `dry_run` reports what would happen without changing anything.
pub async fn cleanup(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(request): Json<CleanupRequest>,
) -> ApiResult<Json<CleanupReport>> {
    require_api_key(&app, &headers)?;
    Ok(Json(app.documents.cleanup(&request).await))
}

/// `GET /advanced/storage/stats` — counts and sizes.
pub async fn storage_stats(State(app): State<Arc<App>>) -> Json<Value> {
    let documents = app.documents.stats();
    let store = match app.store.stats().await {
        Ok(stats) => serde_json::to_value(stats).unwrap_or_default(),
        Err(e) => json!({ "error": e.to_string() }),
    };
    Json(json!({
        "documents": documents,
        "vector_store": store,
        "streaming_connections": app.connections.len(),
    }))
}
