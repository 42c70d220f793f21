//! In-memory vector backend using linear-scan cosine similarity.
//!
//! This is both the transparent fallback used when the primary backend goes
//! away and the reference implementation for search semantics: filter before
//! scoring, rank by descending score with ascending-id tie breaks, scores
//! mapped into [0, 1]. Data is guarded by a reader-writer lock so concurrent
//! searches proceed in parallel while mutations are exclusive.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{BackendStats, SearchFilter, VectorBackend};
use crate::document::{SearchResult, VectorRecord};
use crate::error::{Result, ZeroRagError};

struct Collection {
    dim: usize,
    records: HashMap<String, VectorRecord>,
}

/// A zero-dependency vector backend holding everything in process memory.
/// Durability is explicitly forfeited; the store caps its health score while
/// this backend is active.
#[derive(Default)]
pub struct InMemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cosine similarity of two vectors, mapped into [0, 1].
///
/// Inputs are expected to be pre-normalized; the raw cosine is computed
/// against actual magnitudes anyway so non-normalized inputs still rank
/// correctly. Zero-magnitude inputs score 0.
pub fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    if cosine < 0.0 {
        (cosine + 1.0) / 2.0
    } else {
        cosine
    }
}

fn is_zero_vector(vector: &[f32]) -> bool {
    vector.iter().all(|v| *v == 0.0)
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        match collections.get(name) {
            Some(existing) if existing.dim != dim => Err(ZeroRagError::Conflict(format!(
                "collection '{name}' exists with dimension {}, requested {dim}",
                existing.dim
            ))),
            Some(_) => Ok(()),
            None => {
                collections
                    .insert(name.to_string(), Collection { dim, records: HashMap::new() });
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections.get_mut(collection).ok_or_else(|| {
            ZeroRagError::NotFound(format!("collection '{collection}' does not exist"))
        })?;
        for record in records {
            if record.embedding.len() != target.dim {
                return Err(ZeroRagError::Validation(format!(
                    "vector dimension {} does not match collection dimension {}",
                    record.embedding.len(),
                    target.dim
                )));
            }
            if is_zero_vector(&record.embedding) {
                return Err(ZeroRagError::Validation(format!(
                    "record '{}' has a zero vector",
                    record.id()
                )));
            }
            target.records.insert(record.id().to_string(), record.clone());
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let target = collections.get_mut(collection).ok_or_else(|| {
            ZeroRagError::NotFound(format!("collection '{collection}' does not exist"))
        })?;
        let mut removed = 0;
        for id in ids {
            if target.records.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        if is_zero_vector(vector) {
            return Err(ZeroRagError::Validation("query vector is all zeros".into()));
        }
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| {
            ZeroRagError::NotFound(format!("collection '{collection}' does not exist"))
        })?;
        if vector.len() != target.dim {
            return Err(ZeroRagError::Validation(format!(
                "query dimension {} does not match collection dimension {}",
                vector.len(),
                target.dim
            )));
        }

        let mut scored: Vec<SearchResult> = target
            .records
            .values()
            .filter(|record| filter.map_or(true, |f| f.matches(record)))
            .map(|record| SearchResult {
                chunk: record.chunk.clone(),
                score: cosine_score(&record.embedding, vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn stats(&self, collection: &str) -> Result<BackendStats> {
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| {
            ZeroRagError::NotFound(format!("collection '{collection}' does not exist"))
        })?;
        let points = target.records.len() as u64;
        let vector_bytes = (target.dim * std::mem::size_of::<f32>()) as u64;
        let text_bytes: u64 =
            target.records.values().map(|r| r.chunk.byte_size as u64).sum();
        Ok(BackendStats {
            points,
            estimated_size_bytes: points * vector_bytes + text_bytes,
        })
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::Chunk;

    fn record(id_seed: &str, index: usize, embedding: Vec<f32>) -> VectorRecord {
        let chunk = Chunk::new(id_seed, index, format!("text {index}"), 0, 10, HashMap::new());
        VectorRecord::new(chunk, embedding)
    }

    #[tokio::test]
    async fn upsert_then_search_ranks_self_first() {
        let backend = InMemoryBackend::new();
        backend.ensure_collection("docs", 3).await.unwrap();
        backend
            .upsert(
                "docs",
                &[
                    record("a", 0, vec![1.0, 0.0, 0.0]),
                    record("b", 0, vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let results = backend.search("docs", &[1.0, 0.0, 0.0], 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.source_document_id, "a");
        assert!(results[0].score >= 0.99);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_conflict() {
        let backend = InMemoryBackend::new();
        backend.ensure_collection("docs", 3).await.unwrap();
        backend.ensure_collection("docs", 3).await.unwrap();
        assert!(matches!(
            backend.ensure_collection("docs", 4).await,
            Err(ZeroRagError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn zero_vectors_are_refused() {
        let backend = InMemoryBackend::new();
        backend.ensure_collection("docs", 2).await.unwrap();
        assert!(backend.upsert("docs", &[record("a", 0, vec![0.0, 0.0])]).await.is_err());
        assert!(backend.search("docs", &[0.0, 0.0], 5, None).await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.ensure_collection("docs", 2).await.unwrap();
        let rec = record("a", 0, vec![1.0, 0.0]);
        let id = rec.id().to_string();
        backend.upsert("docs", &[rec]).await.unwrap();

        assert_eq!(backend.delete("docs", &[id.clone()]).await.unwrap(), 1);
        assert_eq!(backend.delete("docs", &[id]).await.unwrap(), 0);
        assert_eq!(backend.delete("docs", &["missing".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn filter_restricts_by_document_id() {
        let backend = InMemoryBackend::new();
        backend.ensure_collection("docs", 2).await.unwrap();
        backend
            .upsert(
                "docs",
                &[record("doc-a", 0, vec![1.0, 0.0]), record("doc-b", 0, vec![1.0, 0.1])],
            )
            .await
            .unwrap();

        let filter = SearchFilter {
            document_ids: Some(vec!["doc-b".to_string()]),
            file_name: None,
        };
        let results =
            backend.search("docs", &[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_document_id, "doc-b");
    }

    #[tokio::test]
    async fn negative_cosine_maps_into_unit_interval() {
        let score = cosine_score(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((0.0..=1.0).contains(&score));
        assert!(score < 0.01);
    }
}
