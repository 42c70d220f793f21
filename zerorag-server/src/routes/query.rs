//! Query endpoints: synchronous answers and SSE token streaming.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;
use zerorag_core::rag::types::{QueryType, ResponseFormat, SafetyLevel};
use zerorag_core::{RagQuery, StreamEvent};

use crate::app::App;
use crate::error::{ApiError, ApiResult};
use crate::routes::{client_ip, enforce_rate_limit, with_rate_headers};

/// `POST /query` — full RAG answer.
pub async fn query(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Json(request): Json<RagQuery>,
) -> ApiResult<Response> {
    let decision = enforce_rate_limit(&app.query_limiter, &headers)?;
    let response = app.rag.answer(&request).await?;
    Ok(with_rate_headers(Json(response).into_response(), decision))
}

/// Query parameters for the SSE streaming endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub query: String,
    pub top_k: Option<usize>,
    pub score_threshold: Option<f32>,
    pub max_context_length: Option<usize>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub include_sources: Option<bool>,
    pub response_format: Option<ResponseFormat>,
    pub safety_level: Option<SafetyLevel>,
    pub query_type: Option<QueryType>,
}

impl StreamParams {
    fn into_query(self) -> RagQuery {
        let mut query = RagQuery::new(self.query);
        if let Some(v) = self.top_k {
            query.top_k = v;
        }
        if let Some(v) = self.score_threshold {
            query.score_threshold = v;
        }
        if let Some(v) = self.max_context_length {
            query.max_context_length = v;
        }
        if let Some(v) = self.max_tokens {
            query.max_tokens = v;
        }
        if let Some(v) = self.temperature {
            query.temperature = v;
        }
        if let Some(v) = self.include_sources {
            query.include_sources = v;
        }
        if let Some(v) = self.response_format {
            query.response_format = v;
        }
        if let Some(v) = self.safety_level {
            query.safety_level = v;
        }
        query.query_type = self.query_type;
        query
    }
}

fn sse_event(event: &StreamEvent) -> Event {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.event_name()).data(payload)
}

/// `GET /query/stream` — Server-Sent Events stream of typed events
/// (`progress`, `sources`, `content`, `error`, `end`). The response carries
/// an `X-Connection-ID` header naming the tracked streaming session.
pub async fn stream(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
) -> ApiResult<Response> {
    let decision = enforce_rate_limit(&app.query_limiter, &headers)?;
    let rag_query = params.into_query();

    let connection_id = Uuid::new_v4().to_string();
    let mut metadata = HashMap::new();
    metadata.insert(
        "query".to_string(),
        rag_query.query_text.chars().take(100).collect::<String>(),
    );
    metadata.insert("remote_addr".to_string(), client_ip(&headers).to_string());
    if let Some(agent) = headers.get("user-agent").and_then(|v| v.to_str().ok()) {
        metadata.insert("user_agent".to_string(), agent.to_string());
    }
    app.connections.create(&connection_id, metadata);
    let guard = app.connections.guard(connection_id.clone());

    // Request validation failures surface as an HTTP error before the
    // stream opens; after this point errors travel as `error` events.
    let mut events = match app.rag.stream(rag_query).await {
        Ok(events) => events,
        Err(e) => return Err(ApiError::from(e)),
    };

    let stream = async_stream::stream! {
        // The guard lives inside the stream: dropping the response body
        // frees the connection entry and hangs up the pipeline channel.
        let guard = guard;
        while let Some(event) = events.recv().await {
            guard.touch();
            if guard.is_closing() {
                debug!(connection_id = guard.id(), "connection closed by operator");
                yield Ok::<Event, std::convert::Infallible>(sse_event(&StreamEvent::End {
                    truncated: true,
                    response_time_ms: 0,
                    tokens_used: None,
                }));
                break;
            }
            let done = matches!(event, StreamEvent::End { .. });
            yield Ok(sse_event(&event));
            if done {
                break;
            }
        }
    };

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    if let Ok(value) = HeaderValue::from_str(&connection_id) {
        response.headers_mut().insert("x-connection-id", value);
    }
    Ok(with_rate_headers(response, decision))
}
