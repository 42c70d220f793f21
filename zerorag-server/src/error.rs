//! HTTP error mapping.
//!
//! Every error response has the shape
//! `{ "error": ..., "detail": ..., "timestamp": ..., "request_id": ... }`.
//! Domain errors from `zerorag-core` translate onto status codes here, in
//! one place, so handlers just use `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;
use zerorag_core::ZeroRagError;

/// JSON body for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
    pub timestamp: f64,
    pub request_id: String,
}

/// An HTTP-mappable error.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub detail: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self { status, code, detail: detail.into(), retry_after_secs: None }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", detail)
    }

    pub fn payload_too_large(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE", detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", detail)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut err = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "rate limit exceeded",
        );
        err.retry_after_secs = Some(retry_after_secs);
        err
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", detail)
    }
}

impl From<ZeroRagError> for ApiError {
    fn from(e: ZeroRagError) -> Self {
        match &e {
            ZeroRagError::Validation(detail) => {
                // Oversize uploads get the dedicated 413.
                if detail.contains("exceeds maximum") && detail.contains("bytes") {
                    Self::payload_too_large(detail.clone())
                } else {
                    Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", detail.clone())
                }
            }
            ZeroRagError::NotFound(detail) => Self::not_found(detail.clone()),
            ZeroRagError::Conflict(detail) => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", detail.clone())
            }
            ZeroRagError::Transient { .. } | ZeroRagError::QueueFull => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                e.to_string(),
            ),
            ZeroRagError::Permanent { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", e.to_string())
            }
            ZeroRagError::RateLimited { retry_after_secs } => {
                Self::rate_limited(*retry_after_secs)
            }
            ZeroRagError::Cancelled(detail) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "CANCELLED", detail.clone())
            }
            ZeroRagError::Internal(detail) => Self::internal(detail.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        if self.status.is_server_error() {
            error!(
                request_id = %request_id,
                status = %self.status,
                detail = %self.detail,
                "request failed"
            );
        }
        let body = ErrorBody {
            error: self.code.to_string(),
            detail: self.detail,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            request_id,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Convenience result for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
