//! Data types for documents, chunks, vector records, and search results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle of a document moving through the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Validating,
    Parsing,
    Chunking,
    Embedding,
    Storing,
    Completed,
    Failed,
    Cancelled,
    Deleted,
}

impl DocumentStatus {
    /// Whether the pipeline has stopped advancing this document.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Deleted)
    }

    /// Progress percentage reached when this stage begins.
    pub fn progress_percent(self) -> f32 {
        match self {
            Self::Pending => 10.0,
            Self::Validating => 20.0,
            Self::Parsing => 40.0,
            Self::Chunking => 60.0,
            Self::Embedding => 80.0,
            Self::Storing => 95.0,
            Self::Completed
            | Self::Failed
            | Self::Cancelled
            | Self::Deleted => 100.0,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Parsing => "parsing",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Storing => "storing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Broad shape of a document's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Structured,
    Mixed,
}

/// Metadata describing a single ingested document.
///
/// Created when an upload is accepted and owned exclusively by the document
/// pipeline; only `status`, the counters filled in during processing, and
/// `error_message` change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Opaque document id.
    pub id: String,
    /// Original upload file name.
    pub file_name: String,
    /// Upload size in bytes.
    pub file_size: u64,
    /// File extension, lowercased, without the leading dot.
    pub file_type: String,
    /// Detected text encoding.
    pub encoding: String,
    pub word_count: usize,
    pub char_count: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub line_count: usize,
    /// Number of chunks produced; matches the index while `completed`.
    pub chunk_count: usize,
    /// SHA-256 of the normalized text, hex encoded.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: u64,
    pub status: DocumentStatus,
    pub is_valid: bool,
    pub validation_errors: Vec<String>,
    pub error_message: Option<String>,
    pub content_type: ContentKind,
    pub has_tables: bool,
    pub has_images: bool,
    pub has_links: bool,
    pub language_detected: Option<String>,
}

impl DocumentMetadata {
    /// Create a fresh record for an accepted upload, before processing.
    pub fn new(id: String, file_name: String, file_size: u64, file_type: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            file_name,
            file_size,
            file_type,
            encoding: "utf-8".to_string(),
            word_count: 0,
            char_count: 0,
            sentence_count: 0,
            paragraph_count: 0,
            line_count: 0,
            chunk_count: 0,
            content_hash: String::new(),
            created_at: now,
            last_modified: now,
            processed_at: None,
            processing_time_ms: 0,
            status: DocumentStatus::Pending,
            is_valid: true,
            validation_errors: Vec::new(),
            error_message: None,
            content_type: ContentKind::Text,
            has_tables: false,
            has_images: false,
            has_links: false,
            language_detected: None,
        }
    }
}

/// The number of preview characters stored on every chunk.
pub const CONTENT_PREVIEW_CHARS: usize = 100;

/// A contiguous fragment of a document, the unit stored in the index.
///
/// Immutable once built. The id is stable across re-ingestion of identical
/// content: it hashes `(source_document_id, chunk_index, start_char)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Stable chunk id.
    pub id: String,
    /// Id of the parent document.
    pub source_document_id: String,
    /// Zero-based position within the parent document.
    pub chunk_index: usize,
    /// The chunk text.
    pub text: String,
    /// Inclusive character offset of the chunk start in the normalized text.
    pub start_char: usize,
    /// Exclusive character offset of the chunk end.
    pub end_char: usize,
    /// UTF-8 byte length of `text`.
    pub byte_size: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    pub created_at: DateTime<Utc>,
    /// First [`CONTENT_PREVIEW_CHARS`] characters of the text.
    pub content_preview: String,
    /// Free-form tags (file name, source annotations).
    pub metadata: HashMap<String, String>,
}

/// Derive the stable id for a chunk.
pub fn chunk_id(source_document_id: &str, chunk_index: usize, start_char: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_document_id.as_bytes());
    hasher.update(chunk_index.to_le_bytes());
    hasher.update(start_char.to_le_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// SHA-256 of a text, hex encoded. Used for content hashes and cache keys.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl Chunk {
    /// Build a chunk from its text and position, deriving id, counts, and
    /// preview.
    pub fn new(
        source_document_id: &str,
        chunk_index: usize,
        text: String,
        start_char: usize,
        end_char: usize,
        metadata: HashMap<String, String>,
    ) -> Self {
        let word_count = text.split_whitespace().count();
        let sentence_count = text
            .chars()
            .filter(|c| matches!(c, '.' | '!' | '?'))
            .count()
            .max(usize::from(!text.is_empty()));
        let content_preview = text.chars().take(CONTENT_PREVIEW_CHARS).collect();
        Self {
            id: chunk_id(source_document_id, chunk_index, start_char),
            source_document_id: source_document_id.to_string(),
            chunk_index,
            byte_size: text.len(),
            word_count,
            sentence_count,
            created_at: Utc::now(),
            content_preview,
            start_char,
            end_char,
            text,
            metadata,
        }
    }
}

/// A chunk paired with its embedding, as written to the vector store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    /// The payload stored alongside the vector.
    pub chunk: Chunk,
    /// Fixed-length embedding; its dimension equals the collection dimension.
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }

    /// The record id, identical to the chunk id.
    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

/// A retrieved chunk paired with a similarity score in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable() {
        assert_eq!(chunk_id("doc-1", 0, 0), chunk_id("doc-1", 0, 0));
        assert_ne!(chunk_id("doc-1", 0, 0), chunk_id("doc-1", 1, 0));
        assert_ne!(chunk_id("doc-1", 0, 0), chunk_id("doc-2", 0, 0));
        assert_eq!(chunk_id("doc-1", 0, 0).len(), 32);
    }

    #[test]
    fn chunk_preview_is_bounded() {
        let text = "a".repeat(500);
        let chunk = Chunk::new("doc", 0, text, 0, 500, HashMap::new());
        assert_eq!(chunk.content_preview.chars().count(), CONTENT_PREVIEW_CHARS);
        assert_eq!(chunk.byte_size, 500);
        assert_eq!(chunk.word_count, 1);
    }

    #[test]
    fn status_progress_boundaries() {
        assert_eq!(DocumentStatus::Pending.progress_percent(), 10.0);
        assert_eq!(DocumentStatus::Storing.progress_percent(), 95.0);
        assert_eq!(DocumentStatus::Completed.progress_percent(), 100.0);
        assert!(DocumentStatus::Failed.is_terminal());
        assert!(!DocumentStatus::Embedding.is_terminal());
    }
}
