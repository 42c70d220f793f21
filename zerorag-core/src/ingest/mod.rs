//! The document processing pipeline: validate → parse → normalize → chunk →
//! embed → store, with per-upload progress and cooperative cancellation.
//!
//! [`DocumentPipeline::ingest`] returns a document id immediately and runs
//! the pipeline on a background task. Progress advances through the state
//! machine at fixed boundaries; any stage error transitions the document to
//! `failed` with the proximate cause, rolling back already-inserted chunks
//! so the index never holds a partial document.

pub mod progress;
pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunking::{normalize_text, SentenceChunker};
use crate::config::AppConfig;
use crate::document::{content_hash, DocumentMetadata, DocumentStatus, VectorRecord};
use crate::embedding::Embedder;
use crate::error::{Result, ZeroRagError};
use crate::parse::{analyze_content, parse_bytes, FileFormat};
use crate::store::VectorStore;
use progress::{CancelFlag, ProgressTracker, UploadProgress};
use validate::{FileValidator, ValidationReport};

/// Embedding retry attempts for transient embedder failures.
const EMBED_RETRY_ATTEMPTS: u32 = 3;

struct DocumentRecord {
    metadata: DocumentMetadata,
    chunk_ids: Vec<String>,
}

/// Parameters for a cleanup pass over documents and upload records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupRequest {
    pub document_ids: Option<Vec<String>>,
    pub older_than_days: Option<u64>,
    #[serde(default)]
    pub failed_uploads_only: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Outcome of a cleanup pass. A dry run reports identical numbers without
/// mutating anything.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub deleted_documents: usize,
    pub deleted_upload_records: usize,
    pub freed_space_bytes: u64,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

/// Aggregate numbers for the storage stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStats {
    pub total_documents: usize,
    pub completed_documents: usize,
    pub failed_documents: usize,
    pub total_chunks: usize,
    pub total_file_bytes: u64,
    pub tracked_uploads: usize,
}

/// The document ingestion pipeline.
pub struct DocumentPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
    validator: FileValidator,
    chunker: SentenceChunker,
    progress: Arc<ProgressTracker>,
    documents: DashMap<String, DocumentRecord>,
    max_chunks_per_document: usize,
    embedding_batch_size: usize,
    embedding_dim: usize,
    processing_timeout: Duration,
}

impl DocumentPipeline {
    pub fn new(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<VectorStore>,
    ) -> Result<Self> {
        Ok(Self {
            embedder,
            store,
            validator: FileValidator::new(&config.document),
            chunker: SentenceChunker::new(
                config.document.chunk_size,
                config.document.chunk_overlap,
            )?,
            progress: Arc::new(ProgressTracker::new()),
            documents: DashMap::new(),
            max_chunks_per_document: config.document.max_chunks_per_document,
            embedding_batch_size: config.models.embedding_batch_size.max(1),
            embedding_dim: config.database.embedding_dim,
            processing_timeout: Duration::from_secs(config.api.upload_timeout_secs),
        })
    }

    /// Stateless upload validation; see [`FileValidator::validate`].
    pub fn validate(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> ValidationReport {
        self.validator.validate(file_name, file_size, content_type)
    }

    /// Accept an upload and start asynchronous processing.
    ///
    /// Returns the stable document id immediately; progress is retrievable
    /// via [`get_progress`](Self::get_progress).
    ///
    /// # Errors
    ///
    /// [`ZeroRagError::Validation`] when the upload fails validation; no
    /// metadata is persisted in that case.
    pub fn ingest(
        self: &Arc<Self>,
        file_name: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
        extra_metadata: HashMap<String, String>,
    ) -> Result<String> {
        let report = self.validate(file_name, bytes.len() as u64, content_type);
        if !report.is_valid {
            return Err(ZeroRagError::Validation(report.errors.join("; ")));
        }

        let document_id = Uuid::new_v4().to_string();
        let metadata = DocumentMetadata::new(
            document_id.clone(),
            file_name.to_string(),
            bytes.len() as u64,
            report.file_extension.clone(),
        );
        self.documents.insert(
            document_id.clone(),
            DocumentRecord { metadata, chunk_ids: Vec::new() },
        );
        let cancel = self.progress.create(
            &document_id,
            file_name,
            bytes.len() as u64,
            extra_metadata.clone(),
        );
        self.progress.advance(&document_id, DocumentStatus::Pending);

        let pipeline = self.clone();
        let id = document_id.clone();
        let name = file_name.to_string();
        tokio::spawn(async move {
            let deadline = pipeline.processing_timeout;
            let run = pipeline.run(&id, &name, bytes, extra_metadata, cancel);
            match tokio::time::timeout(deadline, run).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => pipeline.fail_document(&id, e.to_string()),
                Err(_) => pipeline.fail_document(
                    &id,
                    format!("processing exceeded {}s deadline", deadline.as_secs()),
                ),
            }
        });

        Ok(document_id)
    }

    async fn run(
        &self,
        document_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        extra_metadata: HashMap<String, String>,
        cancel: CancelFlag,
    ) -> Result<()> {
        let started = std::time::Instant::now();

        self.advance(document_id, DocumentStatus::Validating);
        if self.bail_if_cancelled(document_id, &cancel) {
            return Ok(());
        }

        // Parsing.
        self.advance(document_id, DocumentStatus::Parsing);
        let extension = self
            .documents
            .get(document_id)
            .map(|r| r.metadata.file_type.clone())
            .unwrap_or_default();
        let format = FileFormat::from_extension(&extension).ok_or_else(|| {
            ZeroRagError::Validation(format!("unsupported file format: '{extension}'"))
        })?;
        let parsed = parse_bytes(format, &bytes)?;
        let text = normalize_text(&parsed.text);
        if text.is_empty() {
            return Err(ZeroRagError::Validation(
                "document contains no extractable text".into(),
            ));
        }
        let analysis = analyze_content(&text, format);
        let hash = content_hash(&text);
        self.update_record(document_id, |record| {
            let m = &mut record.metadata;
            m.encoding = parsed.encoding.to_string();
            m.word_count = text.split_whitespace().count();
            m.char_count = text.chars().count();
            m.sentence_count = analysis.sentence_count;
            m.paragraph_count = analysis.paragraph_count;
            m.line_count = analysis.line_count;
            m.content_type = analysis.content_type;
            m.has_tables = analysis.has_tables;
            m.has_images = analysis.has_images;
            m.has_links = analysis.has_links;
            m.language_detected = analysis.language_detected.clone();
            m.content_hash = hash.clone();
        });
        if self.bail_if_cancelled(document_id, &cancel) {
            return Ok(());
        }

        // Chunking.
        self.advance(document_id, DocumentStatus::Chunking);
        let mut base_metadata = extra_metadata;
        base_metadata.insert("file_name".to_string(), file_name.to_string());
        base_metadata.extend(parsed.extra);
        let chunks = self.chunker.chunk(document_id, &text, &base_metadata);
        if chunks.is_empty() {
            return Err(ZeroRagError::Validation("no chunks created from document".into()));
        }
        if chunks.len() > self.max_chunks_per_document {
            return Err(ZeroRagError::Validation(format!(
                "chunk count {} exceeds limit {}",
                chunks.len(),
                self.max_chunks_per_document
            )));
        }
        if self.bail_if_cancelled(document_id, &cancel) {
            return Ok(());
        }

        // Embedding, in batches, with retry on transient embedder failures.
        self.advance(document_id, DocumentStatus::Embedding);
        let mut records: Vec<VectorRecord> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embedding_batch_size) {
            if self.bail_if_cancelled(document_id, &cancel) {
                return Ok(());
            }
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embed_with_retries(&texts).await?;
            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != self.embedding_dim {
                    return Err(ZeroRagError::Validation(format!(
                        "embedder returned dimension {}, expected {}",
                        vector.len(),
                        self.embedding_dim
                    )));
                }
                records.push(VectorRecord::new(chunk.clone(), vector));
            }
        }
        if self.bail_if_cancelled(document_id, &cancel) {
            return Ok(());
        }

        // Storing. Chunks insert in chunk_index order within the document.
        self.advance(document_id, DocumentStatus::Storing);
        let chunk_ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        let report = self.store.upsert(&records).await?;
        if !report.is_complete() {
            // Roll back whatever landed so the index never holds a partial
            // document; delete is idempotent over ids that never landed.
            if let Err(e) = self.store.delete(&chunk_ids).await {
                warn!(document_id, error = %e, "rollback delete failed");
            }
            return Err(ZeroRagError::permanent(
                "vector_store",
                format!(
                    "stored {}/{} chunks: {}",
                    report.succeeded,
                    report.total,
                    report.errors.join("; ")
                ),
            ));
        }

        // A delete can land between the upsert and this point; completing
        // is conditional on the record not having been deleted meanwhile.
        let chunk_count = chunk_ids.len();
        let mut deleted_meanwhile = cancel.is_cancelled();
        self.update_record(document_id, |record| {
            if record.metadata.status == DocumentStatus::Deleted || deleted_meanwhile {
                deleted_meanwhile = true;
                return;
            }
            record.chunk_ids = chunk_ids.clone();
            let m = &mut record.metadata;
            m.chunk_count = chunk_count;
            m.status = DocumentStatus::Completed;
            m.processed_at = Some(Utc::now());
            m.processing_time_ms = started.elapsed().as_millis() as u64;
            m.last_modified = Utc::now();
        });
        if deleted_meanwhile {
            if let Err(e) = self.store.delete(&chunk_ids).await {
                warn!(document_id, error = %e, "post-delete rollback failed");
            }
            self.progress.mark_cancelled(document_id);
            info!(document_id, "ingestion cancelled at completion");
            return Ok(());
        }
        self.progress.advance(document_id, DocumentStatus::Completed);
        info!(document_id, chunk_count, "document ingested");
        Ok(())
    }

    async fn embed_with_retries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut delay = Duration::from_millis(200);
        let mut last_error = None;
        for round in 0..EMBED_RETRY_ATTEMPTS {
            match self.embedder.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() => {
                    warn!(round, error = %e, "embedding batch failed, retrying");
                    last_error = Some(e);
                    if round + 1 < EMBED_RETRY_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ZeroRagError::Internal("embed retry exhausted".into())))
    }

    fn advance(&self, document_id: &str, status: DocumentStatus) {
        self.update_record(document_id, |record| {
            record.metadata.status = status;
            record.metadata.last_modified = Utc::now();
        });
        self.progress.advance(document_id, status);
    }

    /// True when cancellation was requested; transitions the record unless a
    /// delete already moved it to `deleted`.
    fn bail_if_cancelled(&self, document_id: &str, cancel: &CancelFlag) -> bool {
        if !cancel.is_cancelled() {
            return false;
        }
        let deleted = self
            .documents
            .get(document_id)
            .map(|r| r.metadata.status == DocumentStatus::Deleted)
            .unwrap_or(true);
        if !deleted {
            self.update_record(document_id, |record| {
                record.metadata.status = DocumentStatus::Cancelled;
                record.metadata.last_modified = Utc::now();
            });
            self.progress.mark_cancelled(document_id);
        }
        info!(document_id, "ingestion cancelled");
        true
    }

    fn fail_document(&self, document_id: &str, message: String) {
        error!(document_id, error = %message, "ingestion failed");
        self.update_record(document_id, |record| {
            record.metadata.status = DocumentStatus::Failed;
            record.metadata.error_message = Some(message.clone());
            record.metadata.last_modified = Utc::now();
        });
        self.progress.fail(document_id, message);
    }

    fn update_record(&self, document_id: &str, mutate: impl FnOnce(&mut DocumentRecord)) {
        if let Some(mut record) = self.documents.get_mut(document_id) {
            mutate(&mut record);
        }
    }

    /// Progress for one upload; copy-on-read.
    pub fn get_progress(&self, document_id: &str) -> Option<UploadProgress> {
        self.progress.get(document_id)
    }

    /// Metadata for one document. Deleted documents are reported as absent.
    pub fn get(&self, document_id: &str) -> Option<DocumentMetadata> {
        self.documents
            .get(document_id)
            .filter(|r| r.metadata.status != DocumentStatus::Deleted)
            .map(|r| r.metadata.clone())
    }

    /// Page through documents, newest first. Deleted documents are excluded
    /// unless explicitly requested via the status filter.
    pub fn list(
        &self,
        status: Option<DocumentStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<DocumentMetadata>, usize) {
        let mut all: Vec<DocumentMetadata> = self
            .documents
            .iter()
            .map(|r| r.metadata.clone())
            .filter(|m| match status {
                Some(wanted) => m.status == wanted,
                None => m.status != DocumentStatus::Deleted,
            })
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    /// Delete a document: cancel any in-flight processing, remove its chunks
    /// from the index, and mark the metadata deleted.
    ///
    /// # Errors
    ///
    /// [`ZeroRagError::NotFound`] for unknown or already-deleted ids.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let chunk_ids = match self.documents.get(document_id) {
            Some(record) if record.metadata.status != DocumentStatus::Deleted => {
                record.chunk_ids.clone()
            }
            _ => {
                return Err(ZeroRagError::NotFound(format!(
                    "document '{document_id}' not found"
                )))
            }
        };
        self.progress.cancel(document_id);

        if !chunk_ids.is_empty() {
            let report = self.store.delete(&chunk_ids).await?;
            if !report.is_complete() {
                return Err(ZeroRagError::permanent(
                    "vector_store",
                    format!("failed to delete {} chunks", report.failed),
                ));
            }
        }
        self.update_record(document_id, |record| {
            record.chunk_ids.clear();
            record.metadata.status = DocumentStatus::Deleted;
            record.metadata.chunk_count = 0;
            record.metadata.last_modified = Utc::now();
        });
        self.progress.mark_cancelled(document_id);
        info!(document_id, "document deleted");
        Ok(())
    }

    /// Run a cleanup pass. With `dry_run` the report is computed identically
    /// but nothing is removed.
    pub async fn cleanup(&self, request: &CleanupRequest) -> CleanupReport {
        let mut report = CleanupReport { dry_run: request.dry_run, ..Default::default() };

        // Sweep upload records first so a dry run and a real run count the
        // same set, independent of document removal below.
        report.deleted_upload_records = self
            .progress
            .sweep(
                request.older_than_days.unwrap_or(0),
                request.failed_uploads_only,
                request.dry_run,
            )
            .len();

        let targets: Vec<String> = if let Some(ids) = &request.document_ids {
            ids.clone()
        } else {
            let cutoff =
                Utc::now() - chrono::Duration::days(request.older_than_days.unwrap_or(0) as i64);
            self.documents
                .iter()
                .filter(|r| {
                    let m = &r.metadata;
                    m.status.is_terminal()
                        && m.created_at <= cutoff
                        && (!request.failed_uploads_only || m.status == DocumentStatus::Failed)
                })
                .map(|r| r.metadata.id.clone())
                .collect()
        };

        for id in targets {
            let Some(record) = self.documents.get(&id) else {
                report.errors.push(format!("document '{id}' not found"));
                continue;
            };
            let freed = record.metadata.file_size;
            let chunk_ids = record.chunk_ids.clone();
            drop(record);

            if !request.dry_run {
                if !chunk_ids.is_empty() {
                    if let Err(e) = self.store.delete(&chunk_ids).await {
                        report.errors.push(format!("document '{id}': {e}"));
                        continue;
                    }
                }
                self.documents.remove(&id);
                self.progress.remove(&id);
            }
            report.deleted_documents += 1;
            report.freed_space_bytes += freed;
        }
        report
    }

    /// Aggregate document statistics.
    pub fn stats(&self) -> DocumentStats {
        let mut stats = DocumentStats {
            total_documents: 0,
            completed_documents: 0,
            failed_documents: 0,
            total_chunks: 0,
            total_file_bytes: 0,
            tracked_uploads: self.progress.len(),
        };
        for record in self.documents.iter() {
            let m = &record.metadata;
            if m.status == DocumentStatus::Deleted {
                continue;
            }
            stats.total_documents += 1;
            stats.total_file_bytes += m.file_size;
            stats.total_chunks += m.chunk_count;
            match m.status {
                DocumentStatus::Completed => stats.completed_documents += 1,
                DocumentStatus::Failed => stats.failed_documents += 1,
                _ => {}
            }
        }
        stats
    }
}
