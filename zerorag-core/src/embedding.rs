//! Embedding provider trait and adapters.
//!
//! The engine consumes embeddings through the [`Embedder`] trait; concrete
//! model servers live behind it. [`RestEmbedder`] talks to an Ollama-style
//! `/api/embed` endpoint, [`CachedEmbedder`] adds an advisory LRU keyed by
//! content hash, and [`MockEmbedder`] produces deterministic vectors for
//! tests and offline development.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::document::content_hash;
use crate::error::{Result, ZeroRagError};

/// A provider that turns text into fixed-length embedding vectors.
///
/// Vectors are expected to be L2-normalized by the provider; the vector
/// store refuses zero vectors but does not re-normalize.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of produced vectors.
    fn dim(&self) -> usize;

    /// Whether the provider is currently reachable.
    async fn health(&self) -> bool;
}

// ── REST adapter ───────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// An [`Embedder`] backed by an Ollama-compatible embeddings endpoint.
pub struct RestEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dim: usize,
}

impl RestEmbedder {
    /// Create an embedder for `base_url` (e.g. `http://localhost:11434`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dim,
        }
    }

    fn request_error(e: reqwest::Error) -> ZeroRagError {
        // Connection-level failures are worth retrying; anything the server
        // answered with is not.
        if e.is_connect() || e.is_timeout() {
            ZeroRagError::transient("embedder", e.to_string())
        } else {
            ZeroRagError::permanent("embedder", e.to_string())
        }
    }
}

#[async_trait]
impl Embedder for RestEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(batch_size = texts.len(), model = %self.model, "embedding batch");

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(Self::request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "embedding request failed");
            return if status.is_server_error() {
                Err(ZeroRagError::transient("embedder", format!("{status}: {body}")))
            } else {
                Err(ZeroRagError::permanent("embedder", format!("{status}: {body}")))
            };
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ZeroRagError::permanent("embedder", format!("bad response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(ZeroRagError::permanent(
                "embedder",
                format!("expected {} vectors, got {}", texts.len(), parsed.embeddings.len()),
            ));
        }
        for vector in &parsed.embeddings {
            if vector.len() != self.dim {
                return Err(ZeroRagError::permanent(
                    "embedder",
                    format!("vector dimension {} does not match {}", vector.len(), self.dim),
                ));
            }
        }
        Ok(parsed.embeddings)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(
            self.client.get(&url).timeout(Duration::from_secs(5)).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

// ── Caching wrapper ────────────────────────────────────────────────

struct LruCache {
    map: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl LruCache {
    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        if let Some(vector) = self.map.get(key).cloned() {
            self.order.retain(|k| k != key);
            self.order.push_back(key.to_string());
            Some(vector)
        } else {
            None
        }
    }

    fn put(&mut self, key: String, vector: Vec<f32>) {
        if self.map.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.map.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, vector);
    }
}

/// Wraps another [`Embedder`] with a bounded LRU cache keyed by the SHA-256
/// of the text. Advisory only: a miss costs one upstream call, a hit costs
/// nothing, and correctness never depends on it.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<LruCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache {
                map: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            for (i, key) in keys.iter().enumerate() {
                match cache.get(key) {
                    Some(hit) => results[i] = Some(hit),
                    None => missing.push(i),
                }
            }
        }

        if !missing.is_empty() {
            let misses: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed(&misses).await?;
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            for (slot, vector) in missing.iter().zip(fresh) {
                cache.put(keys[*slot].clone(), vector.clone());
                results[*slot] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    async fn health(&self) -> bool {
        self.inner.health().await
    }
}

// ── Mock ───────────────────────────────────────────────────────────

/// Deterministic embedder that hashes text into an L2-normalized vector.
/// Identical texts map to identical vectors, so rank-1 round trips hold.
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let digest = content_hash(text);
                let bytes = digest.as_bytes();
                let mut vector: Vec<f32> = (0..self.dim)
                    .map(|i| {
                        let b = bytes[i % bytes.len()] as f32;
                        (b / 127.5) - 1.0
                    })
                    .collect();
                let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in &mut vector {
                        *v /= norm;
                    }
                }
                vector
            })
            .collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_is_deterministic_and_normalized() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed(&["hello".to_string()]).await.unwrap();
        let b = embedder.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);

        let c = embedder.embed(&["different".to_string()]).await.unwrap();
        assert_ne!(a[0], c[0]);
    }

    #[tokio::test]
    async fn cache_serves_repeat_lookups() {
        struct Counting {
            inner: MockEmbedder,
            calls: std::sync::atomic::AtomicUsize,
        }
        #[async_trait]
        impl Embedder for Counting {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                self.calls.fetch_add(texts.len(), std::sync::atomic::Ordering::SeqCst);
                self.inner.embed(texts).await
            }
            fn dim(&self) -> usize {
                self.inner.dim()
            }
            async fn health(&self) -> bool {
                true
            }
        }

        let counting = Arc::new(Counting {
            inner: MockEmbedder::new(16),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(counting.clone() as Arc<dyn Embedder>, 8);

        let texts = vec!["a".to_string(), "b".to_string()];
        let first = cached.embed(&texts).await.unwrap();
        let second = cached.embed(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(counting.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_evicts_least_recently_used() {
        let cached = CachedEmbedder::new(Arc::new(MockEmbedder::new(8)), 2);
        for text in ["one", "two", "three"] {
            cached.embed(&[text.to_string()]).await.unwrap();
        }
        let cache = cached.cache.lock().unwrap();
        assert_eq!(cache.map.len(), 2);
        assert!(!cache.map.contains_key(&content_hash("one")));
    }
}
