//! Document upload, validation, progress, listing, and deletion endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use zerorag_core::ingest::validate::ValidationReport;
use zerorag_core::DocumentStatus;

use crate::app::App;
use crate::error::{ApiError, ApiResult};
use crate::routes::{enforce_rate_limit, require_api_key, with_rate_headers};

#[derive(Debug, Serialize)]
pub struct DocumentUploadResponse {
    pub document_id: String,
    pub filename: String,
    pub file_size: u64,
    pub chunks_created: usize,
    pub processing_time: f64,
    pub status: String,
    pub metadata: Value,
}

/// `POST /documents/upload` — multipart `file` plus optional `metadata`
/// JSON. Processing continues in the background; poll the progress endpoint.
pub async fn upload(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let decision = enforce_rate_limit(&app.upload_limiter, &headers)?;
    require_api_key(&app, &headers)?;

    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut extra_metadata: HashMap<String, String> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                let data = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("failed to read upload: {e}"))
                })?;
                bytes = Some(data.to_vec());
            }
            Some("metadata") => {
                let raw = field.text().await.unwrap_or_default();
                if !raw.is_empty() {
                    extra_metadata = serde_json::from_str(&raw).map_err(|e| {
                        ApiError::bad_request(format!("metadata must be a JSON object: {e}"))
                    })?;
                }
            }
            _ => {}
        }
    }

    let file_name =
        file_name.ok_or_else(|| ApiError::bad_request("no filename provided"))?;
    let bytes = bytes.ok_or_else(|| ApiError::bad_request("missing 'file' field"))?;
    let file_size = bytes.len() as u64;

    let report = app.documents.validate(&file_name, file_size, content_type.as_deref());
    let document_id =
        app.documents
            .ingest(&file_name, content_type.as_deref(), bytes, extra_metadata)?;

    let body = DocumentUploadResponse {
        document_id,
        filename: file_name,
        file_size,
        chunks_created: 0,
        processing_time: 0.0,
        status: "processing".to_string(),
        metadata: json!({
            "content_type": content_type,
            "upload_timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            "validation_warnings": report.warnings,
            "estimated_processing_time": report.estimated_processing_time_secs,
            "supported_features": report.supported_features,
        }),
    };
    Ok(with_rate_headers(Json(body).into_response(), decision))
}

#[derive(Debug, Deserialize)]
pub struct FileValidationRequest {
    pub filename: String,
    pub file_size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileValidationResponse {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub estimated_processing_time: f64,
    pub supported_features: Vec<String>,
}

impl From<ValidationReport> for FileValidationResponse {
    fn from(report: ValidationReport) -> Self {
        Self {
            is_valid: report.is_valid,
            errors: report.errors,
            warnings: report.warnings,
            estimated_processing_time: report.estimated_processing_time_secs,
            supported_features: report.supported_features,
        }
    }
}

/// `POST /documents/validate` — validate before uploading.
pub async fn validate(
    State(app): State<Arc<App>>,
    Json(request): Json<FileValidationRequest>,
) -> Json<FileValidationResponse> {
    let report = app.documents.validate(
        &request.filename,
        request.file_size,
        request.content_type.as_deref(),
    );
    Json(report.into())
}

/// `GET /documents/upload/{id}/progress`.
pub async fn progress(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let progress = app
        .documents
        .get_progress(&id)
        .ok_or_else(|| ApiError::not_found(format!("upload '{id}' not found")))?;
    Ok(Json(serde_json::to_value(progress).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub status: Option<String>,
}

fn default_limit() -> usize {
    100
}

/// `GET /documents?limit&offset&status` — paged metadata listing.
pub async fn list(
    State(app): State<Arc<App>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let status = match &params.status {
        Some(raw) => Some(
            serde_json::from_value::<DocumentStatus>(Value::String(raw.clone()))
                .map_err(|_| ApiError::bad_request(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };
    let (documents, total) = app.documents.list(status, params.limit, params.offset);
    Ok(Json(json!({
        "documents": documents,
        "total": total,
        "limit": params.limit,
        "offset": params.offset,
    })))
}

/// `GET /documents/{id}`.
pub async fn get_one(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let metadata = app
        .documents
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("document '{id}' not found")))?;
    Ok(Json(serde_json::to_value(metadata).unwrap_or_default()))
}

/// `DELETE /documents/{id}` — remove chunks and mark the document deleted.
pub async fn delete_one(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    require_api_key(&app, &headers)?;
    app.documents.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
