//! Qdrant vector backend over gRPC.
//!
//! Chunk payloads are stored as a JSON document under the `chunk` key so
//! retrieval round-trips the full [`Chunk`], with `document_id` and
//! `file_name` duplicated at the top level for server-side filtering.

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::debug;

use crate::backend::{BackendStats, SearchFilter, VectorBackend};
use crate::document::{Chunk, SearchResult, VectorRecord};
use crate::error::{Result, ZeroRagError};

/// A [`VectorBackend`] backed by [Qdrant](https://qdrant.tech/).
pub struct QdrantBackend {
    client: Qdrant,
    dim_bytes: usize,
}

impl QdrantBackend {
    /// Connect to a Qdrant instance at `url` with an optional API key.
    pub fn new(url: &str, api_key: Option<&str>, dim: usize) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder.build().map_err(Self::map_err)?;
        Ok(Self { client, dim_bytes: dim * std::mem::size_of::<f32>() })
    }

    /// Classify a client error: connectivity problems are retryable, rejected
    /// requests are not.
    fn map_err(e: qdrant_client::QdrantError) -> ZeroRagError {
        let message = e.to_string();
        let lowered = message.to_ascii_lowercase();
        let retryable = ["connect", "timeout", "timed out", "unavailable", "transport", "broken"]
            .iter()
            .any(|needle| lowered.contains(needle));
        if retryable {
            ZeroRagError::transient("qdrant", message)
        } else {
            ZeroRagError::permanent("qdrant", message)
        }
    }

    fn to_point(record: &VectorRecord) -> Result<PointStruct> {
        // The full chunk travels as one JSON string so retrieval round-trips
        // every field without per-key payload plumbing; the filterable keys
        // are duplicated as plain strings.
        let chunk_json = serde_json::to_string(&record.chunk)
            .map_err(|e| ZeroRagError::Internal(format!("chunk serialization failed: {e}")))?;
        let mut payload_map = serde_json::Map::new();
        payload_map.insert("chunk_json".to_string(), serde_json::Value::String(chunk_json));
        payload_map.insert(
            "document_id".to_string(),
            serde_json::Value::String(record.chunk.source_document_id.clone()),
        );
        if let Some(file_name) = record.chunk.metadata.get("file_name") {
            payload_map.insert(
                "file_name".to_string(),
                serde_json::Value::String(file_name.clone()),
            );
        }
        let payload = Payload::try_from(serde_json::Value::Object(payload_map))
            .map_err(|e| ZeroRagError::Internal(format!("payload conversion failed: {e}")))?;
        Ok(PointStruct::new(
            record.id().to_string(),
            record.embedding.clone(),
            payload,
        ))
    }

    fn to_filter(filter: &SearchFilter) -> Option<Filter> {
        if filter.is_empty() {
            return None;
        }
        let mut conditions = Vec::new();
        if let Some(ids) = &filter.document_ids {
            conditions.push(Condition::matches("document_id", ids.clone()));
        }
        if let Some(file_name) = &filter.file_name {
            conditions.push(Condition::matches("file_name", file_name.clone()));
        }
        Some(Filter::must(conditions))
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    async fn open(&self) -> Result<()> {
        self.client.list_collections().await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        let collections = self.client.list_collections().await.map_err(Self::map_err)?;
        let exists = collections.collections.iter().any(|c| c.name == name);
        if exists {
            let info = self.client.collection_info(name).await.map_err(Self::map_err)?;
            let existing_dim = info
                .result
                .and_then(|r| r.config)
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|v| v.config)
                .and_then(|cfg| match cfg {
                    qdrant_client::qdrant::vectors_config::Config::Params(params) => {
                        Some(params.size as usize)
                    }
                    _ => None,
                });
            if let Some(existing) = existing_dim {
                if existing != dim {
                    return Err(ZeroRagError::Conflict(format!(
                        "collection '{name}' exists with dimension {existing}, requested {dim}"
                    )));
                }
            }
            debug!(collection = name, "qdrant collection already exists");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dim as u64, Distance::Cosine)),
            )
            .await
            .map_err(Self::map_err)?;
        debug!(collection = name, dim, "created qdrant collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let points: Vec<PointStruct> =
            records.iter().map(Self::to_point).collect::<Result<_>>()?;
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(Self::map_err)?;
        debug!(collection, count = records.len(), "upserted records to qdrant");
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let point_ids: Vec<qdrant_client::qdrant::PointId> =
            ids.iter().map(|id| id.as_str().into()).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(Self::map_err)?;
        debug!(collection, count = ids.len(), "deleted points from qdrant");
        // The delete API does not report how many ids existed; report the
        // requested count. The in-memory backend is exact.
        Ok(ids.len() as u64)
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        if vector.iter().all(|v| *v == 0.0) {
            return Err(ZeroRagError::Validation("query vector is all zeros".into()));
        }
        let mut request =
            SearchPointsBuilder::new(collection, vector.to_vec(), top_k as u64)
                .with_payload(true);
        if let Some(qdrant_filter) = filter.and_then(Self::to_filter) {
            request = request.filter(qdrant_filter);
        }
        let response = self.client.search_points(request).await.map_err(Self::map_err)?;

        let mut results = Vec::with_capacity(response.result.len());
        for scored in response.result {
            let Some(raw) = scored
                .payload
                .get("chunk_json")
                .and_then(|value| match &value.kind {
                    Some(Kind::StringValue(s)) => Some(s.clone()),
                    _ => None,
                })
            else {
                continue;
            };
            let chunk: Chunk = serde_json::from_str(&raw).map_err(|e| {
                ZeroRagError::Internal(format!("chunk payload deserialization failed: {e}"))
            })?;
            // Qdrant reports raw cosine for Distance::Cosine collections.
            let score = if scored.score < 0.0 {
                (scored.score + 1.0) / 2.0
            } else {
                scored.score.clamp(0.0, 1.0)
            };
            results.push(SearchResult { chunk, score });
        }
        Ok(results)
    }

    async fn stats(&self, collection: &str) -> Result<BackendStats> {
        let info = self.client.collection_info(collection).await.map_err(Self::map_err)?;
        let points = info.result.and_then(|r| r.points_count).unwrap_or(0);
        Ok(BackendStats {
            points,
            estimated_size_bytes: points * self.dim_bytes as u64,
        })
    }

    async fn close(&self) {}
}
