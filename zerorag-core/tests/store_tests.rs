//! Vector store behavior: search ordering, queue semantics, backpressure,
//! and fallback failover.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use zerorag_core::backend::{BackendStats, SearchFilter, VectorBackend};
use zerorag_core::document::{Chunk, SearchResult, VectorRecord};
use zerorag_core::store::monitor::AlertSeverity;
use zerorag_core::{
    AppConfig, InMemoryBackend, Priority, Result, VectorStore, ZeroRagError,
};

fn test_config(dim: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.embedding_dim = dim;
    config.database.collection_name = "test_chunks".to_string();
    config.store.batch_size = 4;
    config.store.backend_failure_threshold = 3;
    config
}

fn record(document_id: &str, index: usize, embedding: Vec<f32>) -> VectorRecord {
    let mut metadata = HashMap::new();
    metadata.insert("file_name".to_string(), format!("{document_id}.txt"));
    let chunk = Chunk::new(
        document_id,
        index,
        format!("chunk {index} of {document_id}"),
        index * 10,
        index * 10 + 10,
        metadata,
    );
    VectorRecord::new(chunk, embedding)
}

async fn open_store(dim: usize) -> Arc<VectorStore> {
    let store = Arc::new(VectorStore::new(
        &test_config(dim),
        Arc::new(InMemoryBackend::new()),
    ));
    store.open().await.unwrap();
    store
}

// ── Search ordering (property) ─────────────────────────────────────

fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-6 {
                return None;
            }
            for value in &mut v {
                *value /= norm;
            }
            Some(v)
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For any stored set, search returns at most `top_k` results with
    /// scores in [0, 1], sorted non-increasing, ties broken by ascending
    /// chunk id.
    #[test]
    fn search_results_ordered_and_bounded(
        embeddings in proptest::collection::vec(arb_normalized_embedding(8), 1..16),
        query in arb_normalized_embedding(8),
        top_k in 1usize..20,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = open_store(8).await;
            let records: Vec<VectorRecord> = embeddings
                .iter()
                .enumerate()
                .map(|(i, e)| record("doc", i, e.clone()))
                .collect();
            let stored = records.len();
            let report = store.upsert(&records).await.unwrap();
            prop_assert!(report.is_complete());

            let results = store.search(&query, top_k, None).await.unwrap();
            prop_assert!(results.len() <= top_k);
            prop_assert!(results.len() <= stored);
            for result in &results {
                prop_assert!((0.0..=1.0).contains(&result.score));
            }
            for window in results.windows(2) {
                prop_assert!(window[0].score >= window[1].score);
                if window[0].score == window[1].score {
                    prop_assert!(window[0].chunk.id < window[1].chunk.id);
                }
            }
            Ok(())
        })?;
    }
}

// ── Round trips ────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_then_search_self_is_rank_one() {
    let store = open_store(4).await;
    let target = record("target", 0, vec![0.5, 0.5, 0.5, 0.5]);
    let target_id = target.id().to_string();
    let other = record("other", 0, vec![1.0, 0.0, 0.0, 0.0]);
    store.upsert(&[target.clone(), other]).await.unwrap();

    let results = store.search(&target.embedding, 2, None).await.unwrap();
    assert_eq!(results[0].chunk.id, target_id);
    assert!(results[0].score >= 0.99);
}

#[tokio::test]
async fn delete_unknown_ids_succeeds() {
    let store = open_store(4).await;
    let report = store.delete(&["nope".to_string(), "also-nope".to_string()]).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.total, 2);
}

#[tokio::test]
async fn invalid_records_fail_without_aborting_the_batch() {
    let store = open_store(4).await;
    let good = record("good", 0, vec![1.0, 0.0, 0.0, 0.0]);
    let wrong_dim = record("bad-dim", 0, vec![1.0, 0.0]);
    let zero = record("zero", 0, vec![0.0; 4]);

    let report = store.upsert(&[good, wrong_dim, zero]).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn zero_query_vector_is_refused() {
    let store = open_store(4).await;
    assert!(matches!(
        store.search(&[0.0; 4], 5, None).await,
        Err(ZeroRagError::Validation(_))
    ));
}

// ── Queue semantics ────────────────────────────────────────────────

#[tokio::test]
async fn queued_mutations_apply_and_complete() {
    let store = open_store(4).await;
    let workers = store.start_workers();

    let records: Vec<VectorRecord> =
        (0..10).map(|i| record("queued", i, vec![1.0, 0.0, 0.0, i as f32 / 10.0])).collect();
    let delete_ids: Vec<String> =
        records.iter().take(3).map(|r| r.id().to_string()).collect();

    let upsert_done = store.queue_upsert(records, Priority::Normal).unwrap();
    let delete_done = store.queue_delete(delete_ids, Priority::Normal).unwrap();

    let upsert_report = upsert_done.await.unwrap().unwrap();
    assert!(upsert_report.is_complete());
    let delete_report = delete_done.await.unwrap().unwrap();
    assert!(delete_report.is_complete());

    // Same-priority FIFO: the delete ran after the upsert, so exactly the
    // remaining records are visible.
    assert_eq!(store.count().await.unwrap(), 7);

    store.close().await;
    for worker in workers {
        worker.abort();
    }
}

#[tokio::test]
async fn queue_saturation_returns_queue_full_then_recovers() {
    let mut config = test_config(4);
    config.store.max_queue_size = 5;
    let store = Arc::new(VectorStore::new(&config, Arc::new(InMemoryBackend::new())));
    store.open().await.unwrap();

    // No worker running yet: fill the queue to capacity.
    let mut receivers = Vec::new();
    for i in 0..5 {
        let rx = store
            .queue_upsert(vec![record("fill", i, vec![1.0, 0.0, 0.0, 0.0])], Priority::Low)
            .unwrap();
        receivers.push(rx);
    }
    let overflow =
        store.queue_upsert(vec![record("fill", 99, vec![1.0, 0.0, 0.0, 0.0])], Priority::High);
    assert!(matches!(overflow, Err(ZeroRagError::QueueFull)));
    assert!(store
        .recent_alerts(10, Some(AlertSeverity::High))
        .iter()
        .any(|a| a.kind == "queue_full"));

    // Drain, then new work is accepted again.
    let workers = store.start_workers();
    for rx in receivers {
        rx.await.unwrap().unwrap();
    }
    assert!(store
        .queue_upsert(vec![record("after", 0, vec![0.0, 1.0, 0.0, 0.0])], Priority::Normal)
        .is_ok());

    store.close().await;
    for worker in workers {
        worker.abort();
    }
}

// ── Fallback failover ──────────────────────────────────────────────

/// Backend that can be switched into a failing state at runtime.
struct FlakyBackend {
    inner: InMemoryBackend,
    failing: AtomicBool,
    failures_seen: AtomicU64,
}

impl FlakyBackend {
    fn new() -> Self {
        Self {
            inner: InMemoryBackend::new(),
            failing: AtomicBool::new(false),
            failures_seen: AtomicU64::new(0),
        }
    }

    fn fail_from_now_on(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures_seen.fetch_add(1, Ordering::SeqCst);
            Err(ZeroRagError::transient("flaky", "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn open(&self) -> Result<()> {
        self.check()
    }

    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        self.check()?;
        self.inner.ensure_collection(name, dim).await
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        self.check()?;
        self.inner.upsert(collection, records).await
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<u64> {
        self.check()?;
        self.inner.delete(collection, ids).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        self.check()?;
        self.inner.search(collection, vector, top_k, filter).await
    }

    async fn stats(&self, collection: &str) -> Result<BackendStats> {
        self.check()?;
        self.inner.stats(collection).await
    }

    async fn close(&self) {}
}

#[tokio::test(start_paused = true)]
async fn sustained_backend_failure_degrades_to_memory() {
    let backend = Arc::new(FlakyBackend::new());
    let store = Arc::new(VectorStore::new(&test_config(4), backend.clone()));
    store.open().await.unwrap();
    assert!(!store.is_degraded());

    store.upsert(&[record("before", 0, vec![1.0, 0.0, 0.0, 0.0])]).await.unwrap();

    backend.fail_from_now_on();
    // Three consecutive transient failures trip the threshold; the final
    // attempt lands on the fallback, so the call itself still succeeds.
    let report =
        store.upsert(&[record("after", 0, vec![0.0, 1.0, 0.0, 0.0])]).await.unwrap();
    assert!(report.is_complete(), "{:?}", report.errors);
    assert!(store.is_degraded());

    // Fallback serves reads; data written before the failure lived in the
    // primary only, so only post-failover data is visible.
    let results = store.search(&[0.0, 1.0, 0.0, 0.0], 5, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.source_document_id, "after");

    let health = store.health().await;
    assert!(health.score <= 70);
    assert_eq!(health.status, "degraded");
    assert!(!health.backend_up);
    assert!(store
        .recent_alerts(10, Some(AlertSeverity::Critical))
        .iter()
        .any(|a| a.kind == "backend_degraded"));
}

#[tokio::test(start_paused = true)]
async fn degraded_at_startup_and_reload_restores() {
    let backend = Arc::new(FlakyBackend::new());
    backend.fail_from_now_on();
    let store = Arc::new(VectorStore::new(&test_config(4), backend.clone()));
    store.open().await.unwrap();
    assert!(store.is_degraded(), "unreachable primary must degrade at startup");

    // No automatic fail-back: the primary recovering is not observed...
    backend.failing.store(false, Ordering::SeqCst);
    assert!(store.is_degraded());

    // ...until an explicit reload.
    store.reload().await.unwrap();
    assert!(!store.is_degraded());
    let health = store.health().await;
    assert!(health.backend_up);
}
