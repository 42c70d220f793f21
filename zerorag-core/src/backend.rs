//! The pluggable vector backend contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{SearchResult, VectorRecord};
use crate::error::Result;

/// Storage-level statistics for a collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendStats {
    /// Number of stored vectors.
    pub points: u64,
    /// Approximate storage footprint in bytes.
    pub estimated_size_bytes: u64,
}

/// Payload filter applied to searches.
///
/// Backends that support server-side filtering apply it before ranking;
/// the in-memory implementation filters before scoring, which is equivalent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Restrict results to chunks of these parent documents.
    pub document_ids: Option<Vec<String>>,
    /// Restrict results to chunks from this source file name.
    pub file_name: Option<String>,
}

impl SearchFilter {
    /// Whether the filter imposes no restriction.
    pub fn is_empty(&self) -> bool {
        self.document_ids.is_none() && self.file_name.is_none()
    }

    /// Whether a record's payload satisfies the filter.
    pub fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(ids) = &self.document_ids {
            if !ids.iter().any(|id| id == &record.chunk.source_document_id) {
                return false;
            }
        }
        if let Some(file_name) = &self.file_name {
            match record.chunk.metadata.get("file_name") {
                Some(name) if name == file_name => {}
                _ => return false,
            }
        }
        true
    }
}

/// A storage backend for vector records.
///
/// Implementations must distinguish retryable failures
/// ([`ZeroRagError::Transient`]) from permanent ones
/// ([`ZeroRagError::Permanent`]); the store's retry and fallback policy is
/// built on that distinction. The in-memory implementation is authoritative
/// for search semantics.
///
/// [`ZeroRagError::Transient`]: crate::error::ZeroRagError::Transient
/// [`ZeroRagError::Permanent`]: crate::error::ZeroRagError::Permanent
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Probe connectivity. Called at startup and by `reload`.
    async fn open(&self) -> Result<()>;

    /// Create the collection if absent. Fails with
    /// [`ZeroRagError::Conflict`] if it exists with a different dimension.
    ///
    /// [`ZeroRagError::Conflict`]: crate::error::ZeroRagError::Conflict
    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<()>;

    /// Insert or replace records by id.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

    /// Delete records by id, returning how many existed. Unknown ids are
    /// not an error.
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<u64>;

    /// Return up to `top_k` results ranked by descending similarity.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Collection statistics.
    async fn stats(&self, collection: &str) -> Result<BackendStats>;

    /// Release any held resources. Infallible by design; failures are logged
    /// by implementations.
    async fn close(&self);
}
