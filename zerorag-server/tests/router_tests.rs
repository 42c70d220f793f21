//! Router-level tests over an app composed with mock collaborators.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;
use zerorag_core::embedding::MockEmbedder;
use zerorag_core::generation::MockGenerator;
use zerorag_core::{AppConfig, InMemoryBackend};
use zerorag_server::routes;
use zerorag_server::App;

const DIM: usize = 16;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.database.embedding_dim = DIM;
    config.document.max_file_size = 1024;
    config.api.rate_limit_per_minute = 1000;
    config.api.upload_rate_limit_per_minute = 1000;
    config
}

async fn test_router(config: AppConfig) -> Router {
    let app = App::compose(
        config,
        Arc::new(MockEmbedder::new(DIM)),
        Arc::new(MockGenerator::new(
            "No document context was available, so here is a general answer instead.",
        )),
        Arc::new(InMemoryBackend::new()),
    )
    .await
    .unwrap();
    routes::router(app)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn ping_and_root_respond() {
    let router = test_router(test_config()).await;

    let response = router
        .clone()
        .oneshot(Request::get("/health/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");

    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "ZeroRAG API");
}

#[tokio::test]
async fn health_reports_overall_and_per_service_status() {
    let router = test_router(test_config()).await;

    let response = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["services"]["vector_store"]["score"].as_i64().unwrap() >= 90);

    let response = router
        .clone()
        .oneshot(
            Request::get("/health/services/vector_store").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(Request::get("/health/services/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn query_happy_path_and_validation_error() {
    let router = test_router(test_config()).await;

    let response = router
        .clone()
        .oneshot(
            Request::post("/query")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"query": "Hello there"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    let body = body_json(response).await;
    assert!(!body["answer"].as_str().unwrap().is_empty());
    assert!(body["sources"].as_array().unwrap().is_empty());

    // Empty query is rejected as a validation error.
    let response = router
        .oneshot(
            Request::post("/query")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"query": "   "}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert!(body["request_id"].as_str().is_some());
}

#[tokio::test]
async fn rate_limit_rejects_with_headers_and_retry_after() {
    let mut config = test_config();
    config.api.rate_limit_per_minute = 2;
    let router = test_router(config).await;

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(
                Request::post("/query")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query": "hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .oneshot(
            Request::post("/query")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"query": "hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body = body_json(response).await;
    assert_eq!(body["error"], "RATE_LIMITED");
}

fn multipart_body(boundary: &str, file_name: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: text/plain\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn upload_accepts_small_file_and_rejects_oversize_with_413() {
    let router = test_router(test_config()).await;
    let boundary = "zerorag-test-boundary";

    let response = router
        .clone()
        .oneshot(
            Request::post("/documents/upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(multipart_body(
                    boundary,
                    "notes.txt",
                    b"A short note. It has two sentences.",
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "processing");
    let document_id = body["document_id"].as_str().unwrap().to_string();

    // Progress endpoint knows the upload.
    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/documents/upload/{document_id}/progress"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Oversize: max_file_size is 1 KB in the test config.
    let response = router
        .oneshot(
            Request::post("/documents/upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(multipart_body(boundary, "big.txt", &vec![b'x'; 2048])))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"], "FILE_TOO_LARGE");
}

#[tokio::test]
async fn validate_endpoint_reports_errors_without_persisting() {
    let router = test_router(test_config()).await;
    let response = router
        .clone()
        .oneshot(
            Request::post("/documents/validate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"filename": "evil.pdf.exe", "file_size": 100, "content_type": "text/plain"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["is_valid"], false);
    assert!(!body["errors"].as_array().unwrap().is_empty());

    // Nothing was persisted.
    let response = router
        .oneshot(Request::get("/documents").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn unknown_document_and_connection_return_404() {
    let router = test_router(test_config()).await;

    let response = router
        .clone()
        .oneshot(Request::get("/documents/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .clone()
        .oneshot(Request::delete("/documents/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(
            Request::delete("/advanced/connections/ghost").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_key_gates_mutating_endpoints_when_configured() {
    let mut config = test_config();
    config.api.api_key = Some("sekrit".to_string());
    let router = test_router(config).await;

    let response = router
        .clone()
        .oneshot(Request::delete("/documents/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With the key, the request proceeds to the 404 it deserves.
    let response = router
        .oneshot(
            Request::delete("/documents/ghost")
                .header("x-api-key", "sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cleanup_and_storage_stats_respond() {
    let router = test_router(test_config()).await;

    let response = router
        .clone()
        .oneshot(
            Request::post("/advanced/cleanup")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"dry_run": true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["dry_run"], true);
    assert_eq!(body["deleted_documents"], 0);

    let response = router
        .oneshot(Request::get("/advanced/storage/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["streaming_connections"], 0);
    assert_eq!(body["vector_store"]["points"], 0);
}

#[tokio::test]
async fn metrics_counts_requests() {
    let router = test_router(test_config()).await;

    router
        .clone()
        .oneshot(Request::get("/health/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let response = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["total_requests"].as_u64().unwrap() >= 1);
    assert!(body["success_rate"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn stream_endpoint_sets_connection_header_and_streams_events() {
    let router = test_router(test_config()).await;

    let response = router
        .oneshot(
            Request::get("/query/stream?query=hello%20there")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-connection-id"));
    let content_type =
        response.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("event: sources"));
    assert!(text.contains("event: content"));
    assert!(text.contains("event: end"));
    let end_pos = text.rfind("event: end").unwrap();
    assert!(
        !text[end_pos..].contains("event: content"),
        "no content after the end event"
    );
}
