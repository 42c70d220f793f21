//! End-to-end query answering: classify → embed → retrieve → pack →
//! prompt → generate → validate, with a token-streaming variant.
//!
//! Streaming uses a bounded channel with a writer task per query; the
//! reader side backs onto the HTTP response body. Dropping the receiver
//! (client disconnect) makes the next send fail, which cancels generation
//! at that yield point.

pub mod context;
pub mod prompt;
pub mod types;
pub mod validate;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::SearchFilter;
use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::{Result, ZeroRagError};
use crate::generation::Generator;
use crate::store::VectorStore;
use context::{pack_context, PackedContext};
use prompt::PromptEngine;
use types::{QueryType, RagQuery, RagResponse, StreamEvent, ValidationStatus};
use validate::ResponseValidator;

/// Buffered stream events between the writer task and the HTTP body.
const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct MetricsInner {
    total_queries: u64,
    successful_queries: u64,
    failed_queries: u64,
    total_response_ms: u64,
    total_retrieval_ms: u64,
    total_generation_ms: u64,
    total_context_chars: u64,
    total_documents_retrieved: u64,
    total_safety_score: f64,
    validation_warnings: u64,
    validation_errors: u64,
}

/// Rolling averages over all processed queries.
#[derive(Debug, Clone, Serialize)]
pub struct RagMetricsSnapshot {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub avg_retrieval_time_ms: f64,
    pub avg_generation_time_ms: f64,
    pub avg_context_length: f64,
    pub avg_documents_retrieved: f64,
    pub avg_safety_score: f64,
    pub validation_warnings: u64,
    pub validation_errors: u64,
}

/// The RAG pipeline orchestrator.
pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    store: Arc<VectorStore>,
    prompts: PromptEngine,
    validator: ResponseValidator,
    query_timeout: Duration,
    metrics: Mutex<MetricsInner>,
}

struct Retrieval {
    packed: PackedContext,
    retrieved: usize,
    elapsed_ms: u64,
}

impl RagPipeline {
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: Arc<VectorStore>,
    ) -> Self {
        Self {
            embedder,
            generator,
            store,
            prompts: PromptEngine::new(),
            validator: ResponseValidator::new(),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            metrics: Mutex::new(MetricsInner::default()),
        }
    }

    /// Resolve the query type, honoring an explicit override.
    fn query_type_for(&self, query: &RagQuery) -> QueryType {
        query.query_type.unwrap_or_else(|| self.prompts.classify(&query.query_text))
    }

    fn search_filter(query: &RagQuery) -> Option<SearchFilter> {
        query.document_ids.as_ref().map(|ids| SearchFilter {
            document_ids: Some(ids.clone()),
            file_name: None,
        })
    }

    /// Embed the query, retrieve top-k, apply the score threshold, and pack
    /// context. An empty outcome is not an error; the caller falls back to
    /// the no-context template.
    async fn retrieve(&self, query: &RagQuery) -> Result<Retrieval> {
        let started = Instant::now();
        let vectors = self.embedder.embed(std::slice::from_ref(&query.query_text)).await?;
        let query_vector = vectors.into_iter().next().ok_or_else(|| {
            ZeroRagError::permanent("embedder", "no vector returned for query")
        })?;

        let filter = Self::search_filter(query);
        let results =
            self.store.search(&query_vector, query.top_k, filter.as_ref()).await?;
        let retained: Vec<_> = results
            .into_iter()
            .filter(|r| r.score >= query.score_threshold)
            .collect();
        debug!(retained = retained.len(), "retrieval finished");

        Ok(Retrieval {
            packed: pack_context(&retained, query.max_context_length),
            retrieved: retained.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Answer a query synchronously.
    pub async fn answer(&self, query: &RagQuery) -> Result<RagResponse> {
        query.validate()?;
        let started = Instant::now();
        let query_type = self.query_type_for(query);

        let outcome = tokio::time::timeout(self.query_timeout, async {
            let retrieval = self.retrieve(query).await?;
            let prompt = self.prompts.build(
                query_type,
                query.safety_level,
                query.response_format,
                &retrieval.packed.text,
                query.query_text.trim(),
            );
            let generation_started = Instant::now();
            let generation = self
                .generator
                .generate(&prompt, query.max_tokens, query.temperature)
                .await?;
            Ok::<_, ZeroRagError>((
                retrieval,
                generation,
                generation_started.elapsed().as_millis() as u64,
            ))
        })
        .await;

        let (retrieval, generation, generation_ms) = match outcome {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                self.note_failure();
                return Err(e);
            }
            Err(_) => {
                self.note_failure();
                return Err(ZeroRagError::Cancelled(format!(
                    "query exceeded {}s deadline",
                    self.query_timeout.as_secs()
                )));
            }
        };

        let validation = self.validator.validate(
            &generation.text,
            &retrieval.packed.text,
            query.response_format,
            !retrieval.packed.sources.is_empty(),
        );
        let response_time_ms = started.elapsed().as_millis() as u64;
        let avg_relevance = if retrieval.packed.sources.is_empty() {
            0.0
        } else {
            retrieval.packed.sources.iter().map(|s| s.score as f64).sum::<f64>()
                / retrieval.packed.sources.len() as f64
        };

        self.note_success(
            response_time_ms,
            retrieval.elapsed_ms,
            generation_ms,
            retrieval.packed.char_length,
            retrieval.retrieved,
            validation.safety_score,
            validation.status,
        );
        info!(
            response_time_ms,
            documents = retrieval.retrieved,
            status = ?validation.status,
            "query answered"
        );

        let sources =
            if query.include_sources { retrieval.packed.sources } else { Vec::new() };
        Ok(RagResponse {
            answer: generation.text,
            sources,
            response_time_ms,
            tokens_used: generation.tokens_used,
            validation_status: validation.status,
            safety_score: validation.safety_score,
            query_type,
            metadata: serde_json::json!({
                "context_length": retrieval.packed.char_length,
                "documents_retrieved": retrieval.retrieved,
                "avg_relevance_score": avg_relevance,
                "context_overlap": validation.context_overlap,
                "validation_issues": validation.issues,
                "fallback": retrieval.retrieved == 0,
            }),
        })
    }

    /// Answer a query as an ordered event stream.
    ///
    /// Events: optional `progress`, exactly one `sources` (before content),
    /// `content` fragments in generation order, an `error` on failure, and
    /// always a final `end`. Request validation failures surface as an
    /// `Err` before any event is produced.
    pub async fn stream(
        self: &Arc<Self>,
        query: RagQuery,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        query.validate()?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run_stream(query, tx).await;
        });
        Ok(rx)
    }

    async fn run_stream(&self, query: RagQuery, tx: mpsc::Sender<StreamEvent>) {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.query_timeout;
        let query_type = self.query_type_for(&query);
        let mut truncated = false;
        let mut emitted_chars = 0usize;

        let finish = |tx: mpsc::Sender<StreamEvent>,
                      truncated: bool,
                      elapsed_ms: u64,
                      tokens: Option<u32>| async move {
            let _ = tx
                .send(StreamEvent::End {
                    truncated,
                    response_time_ms: elapsed_ms,
                    tokens_used: tokens,
                })
                .await;
        };

        if tx
            .send(StreamEvent::Progress { stage: "retrieving".into() })
            .await
            .is_err()
        {
            return;
        }

        let retrieval =
            match tokio::time::timeout_at(deadline, self.retrieve(&query)).await {
                Ok(Ok(retrieval)) => retrieval,
                Ok(Err(e)) => {
                    self.note_failure();
                    let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                    finish(tx, false, started.elapsed().as_millis() as u64, None).await;
                    return;
                }
                Err(_) => {
                    self.note_failure();
                    let _ = tx
                        .send(StreamEvent::Error { message: "query deadline exceeded".into() })
                        .await;
                    finish(tx, true, started.elapsed().as_millis() as u64, None).await;
                    return;
                }
            };

        if query.include_sources {
            let event = StreamEvent::Sources { sources: retrieval.packed.sources.clone() };
            if tx.send(event).await.is_err() {
                return;
            }
        } else if tx
            .send(StreamEvent::Sources { sources: Vec::new() })
            .await
            .is_err()
        {
            return;
        }

        if tx
            .send(StreamEvent::Progress { stage: "generating".into() })
            .await
            .is_err()
        {
            return;
        }

        let prompt = self.prompts.build(
            query_type,
            query.safety_level,
            query.response_format,
            &retrieval.packed.text,
            query.query_text.trim(),
        );
        let token_stream = match tokio::time::timeout_at(
            deadline,
            self.generator.stream(&prompt, query.max_tokens, query.temperature),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.note_failure();
                let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                finish(tx, false, started.elapsed().as_millis() as u64, None).await;
                return;
            }
            Err(_) => {
                self.note_failure();
                let _ = tx
                    .send(StreamEvent::Error { message: "query deadline exceeded".into() })
                    .await;
                finish(tx, true, started.elapsed().as_millis() as u64, None).await;
                return;
            }
        };

        // Forward tokens until the stream ends, the deadline passes, or the
        // client goes away. Dropping `token_stream` aborts generation.
        let mut token_stream = token_stream;
        loop {
            match tokio::time::timeout_at(deadline, token_stream.next()).await {
                Ok(Some(Ok(fragment))) => {
                    emitted_chars += fragment.chars().count();
                    if tx.send(StreamEvent::Content { text: fragment }).await.is_err() {
                        warn!("stream client disconnected, cancelling generation");
                        truncated = true;
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                    truncated = true;
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    let _ = tx
                        .send(StreamEvent::Error { message: "query deadline exceeded".into() })
                        .await;
                    truncated = true;
                    break;
                }
            }
        }
        drop(token_stream);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.note_success(
            elapsed_ms,
            retrieval.elapsed_ms,
            elapsed_ms.saturating_sub(retrieval.elapsed_ms),
            retrieval.packed.char_length,
            retrieval.retrieved,
            1.0,
            ValidationStatus::Valid,
        );
        debug!(emitted_chars, truncated, "stream finished");
        finish(tx, truncated, elapsed_ms, None).await;
    }

    #[allow(clippy::too_many_arguments)]
    fn note_success(
        &self,
        response_ms: u64,
        retrieval_ms: u64,
        generation_ms: u64,
        context_chars: usize,
        documents: usize,
        safety_score: f32,
        status: ValidationStatus,
    ) {
        let mut m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        m.total_queries += 1;
        m.successful_queries += 1;
        m.total_response_ms += response_ms;
        m.total_retrieval_ms += retrieval_ms;
        m.total_generation_ms += generation_ms;
        m.total_context_chars += context_chars as u64;
        m.total_documents_retrieved += documents as u64;
        m.total_safety_score += safety_score as f64;
        match status {
            ValidationStatus::Warning => m.validation_warnings += 1,
            ValidationStatus::Error => m.validation_errors += 1,
            ValidationStatus::Valid => {}
        }
    }

    fn note_failure(&self) {
        let mut m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        m.total_queries += 1;
        m.failed_queries += 1;
    }

    /// Rolling metrics for the metrics endpoint.
    pub fn metrics_snapshot(&self) -> RagMetricsSnapshot {
        let m = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let total = m.total_queries.max(1) as f64;
        let successes = m.successful_queries.max(1) as f64;
        RagMetricsSnapshot {
            total_queries: m.total_queries,
            successful_queries: m.successful_queries,
            failed_queries: m.failed_queries,
            success_rate: if m.total_queries == 0 {
                1.0
            } else {
                m.successful_queries as f64 / total
            },
            avg_response_time_ms: m.total_response_ms as f64 / successes,
            avg_retrieval_time_ms: m.total_retrieval_ms as f64 / successes,
            avg_generation_time_ms: m.total_generation_ms as f64 / successes,
            avg_context_length: m.total_context_chars as f64 / successes,
            avg_documents_retrieved: m.total_documents_retrieved as f64 / successes,
            avg_safety_score: if m.successful_queries == 0 {
                1.0
            } else {
                m.total_safety_score / successes
            },
            validation_warnings: m.validation_warnings,
            validation_errors: m.validation_errors,
        }
    }
}
