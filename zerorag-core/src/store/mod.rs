//! The vector store: batching, retries, a background operation queue,
//! memory discipline, and a transparent in-memory fallback.
//!
//! The store owns the index. All reads and writes go through the active
//! backend handle; when the primary backend fails a configured number of
//! consecutive times, the handle atomically swaps to the in-memory
//! implementation and stays there until an explicit [`VectorStore::reload`]
//! succeeds. Mutations queued via `queue_*` are applied by a single worker
//! task in priority-then-FIFO order.

pub mod metrics;
pub mod monitor;
pub mod queue;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::backend::{SearchFilter, VectorBackend};
use crate::config::{AppConfig, StoreConfig};
use crate::document::{SearchResult, VectorRecord};
use crate::error::{Result, ZeroRagError};
use crate::inmemory::InMemoryBackend;
use metrics::{MetricsSnapshot, OperationMetrics};
use monitor::{process_rss_mb, AlertLog, AlertSeverity, CleanupTier, MemoryWatch, PerformanceAlert};
use queue::{OperationQueue, Priority, QueuedOp};

/// Retry attempts for transient backend failures.
const RETRY_ATTEMPTS: u32 = 3;

/// Initial retry backoff; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Health score ceiling while running on the in-memory fallback.
const DEGRADED_SCORE_CAP: i32 = 70;

/// Per-record outcome summary for a batch operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BatchReport {
    /// Whether every record in the batch succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Aggregated store health, as exposed by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub status: &'static str,
    pub score: i32,
    pub issues: Vec<String>,
    pub backend: &'static str,
    pub backend_up: bool,
    pub degraded: bool,
    pub memory_mb: f64,
    pub queue_size: usize,
    pub points: u64,
}

/// Storage statistics for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub backend: &'static str,
    pub degraded: bool,
    pub points: u64,
    pub estimated_size_bytes: u64,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub alert_count: usize,
}

/// The vector store facade over a primary backend and its in-memory fallback.
pub struct VectorStore {
    collection: String,
    dim: usize,
    config: StoreConfig,
    primary: Arc<dyn VectorBackend>,
    fallback: Arc<InMemoryBackend>,
    active: RwLock<Arc<dyn VectorBackend>>,
    degraded: AtomicBool,
    consecutive_failures: AtomicU32,
    metrics: OperationMetrics,
    alerts: AlertLog,
    queue: Arc<OperationQueue>,
    memory: MemoryWatch,
}

impl VectorStore {
    /// Build a store over `primary`. Call [`open`](Self::open) before use and
    /// [`start_workers`](Self::start_workers) to run the background services.
    pub fn new(config: &AppConfig, primary: Arc<dyn VectorBackend>) -> Self {
        let fallback = Arc::new(InMemoryBackend::new());
        Self {
            collection: config.database.collection_name.clone(),
            dim: config.database.embedding_dim,
            config: config.store.clone(),
            active: RwLock::new(primary.clone()),
            primary,
            fallback,
            degraded: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            metrics: OperationMetrics::new(),
            alerts: AlertLog::new(),
            queue: Arc::new(OperationQueue::new(config.store.max_queue_size)),
            memory: MemoryWatch::new(
                config.store.memory_threshold_mb,
                config.store.memory_critical_threshold_mb,
            ),
        }
    }

    /// Probe the primary backend and ensure the collection exists. If the
    /// primary is unreachable, the store starts degraded on the in-memory
    /// fallback instead of failing.
    pub async fn open(&self) -> Result<()> {
        // The fallback collection is prepared up front so a mid-run degrade
        // never races collection creation.
        self.fallback.ensure_collection(&self.collection, self.dim).await?;

        let primary_ready = match self.primary.open().await {
            Ok(()) => self.primary.ensure_collection(&self.collection, self.dim).await,
            Err(e) => Err(e),
        };
        match primary_ready {
            Ok(()) => {
                info!(
                    backend = self.primary.name(),
                    collection = %self.collection,
                    dim = self.dim,
                    "vector store ready"
                );
                Ok(())
            }
            Err(ZeroRagError::Conflict(message)) => Err(ZeroRagError::Conflict(message)),
            Err(e) => {
                error!(error = %e, "primary backend unavailable at startup");
                self.enter_degraded(&e).await;
                Ok(())
            }
        }
    }

    /// Idempotently create a collection on the active backend.
    ///
    /// # Errors
    ///
    /// [`ZeroRagError::Conflict`] when the collection exists with a
    /// different dimension.
    pub async fn create_collection(&self, name: &str, dim: usize) -> Result<()> {
        let backend = self.active_backend().await;
        backend.ensure_collection(name, dim).await
    }

    /// The collection every document chunk lives in.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether the store is currently on the in-memory fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Current queue depth.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Recent performance alerts, newest last.
    pub fn recent_alerts(
        &self,
        limit: usize,
        severity: Option<AlertSeverity>,
    ) -> Vec<PerformanceAlert> {
        self.alerts.recent(limit, severity)
    }

    /// Metrics snapshot for the metrics endpoint.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn active_backend(&self) -> Arc<dyn VectorBackend> {
        self.active.read().await.clone()
    }

    async fn enter_degraded(&self, cause: &ZeroRagError) {
        if self.degraded.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut active = self.active.write().await;
            *active = self.fallback.clone();
        }
        self.alerts.record(
            "backend_degraded",
            AlertSeverity::Critical,
            format!(
                "primary backend '{}' unavailable, switched to in-memory fallback: {cause}",
                self.primary.name()
            ),
            serde_json::json!({
                "consecutive_failures": self.consecutive_failures.load(Ordering::Relaxed),
            }),
        );
        error!(
            backend = self.primary.name(),
            "vector store degraded to in-memory fallback; durability is forfeited until reload"
        );
    }

    /// Re-open the primary backend and fail back to it. The store never
    /// fails back automatically; this is the explicit recovery path.
    pub async fn reload(&self) -> Result<()> {
        self.primary.open().await?;
        self.primary.ensure_collection(&self.collection, self.dim).await?;
        {
            let mut active = self.active.write().await;
            *active = self.primary.clone();
        }
        self.degraded.store(false, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        info!(backend = self.primary.name(), "primary backend restored");
        self.alerts.record(
            "backend_restored",
            AlertSeverity::Medium,
            format!("primary backend '{}' restored", self.primary.name()),
            serde_json::json!({}),
        );
        Ok(())
    }

    async fn note_transient_failure(&self, error: &ZeroRagError) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(failures, error = %error, "transient backend failure");
        if failures >= self.config.backend_failure_threshold && !self.is_degraded() {
            self.enter_degraded(error).await;
        }
    }

    fn note_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Run `attempt` against the active backend, retrying transient failures
    /// with capped exponential backoff. If retries exhaust and the store
    /// degraded along the way, one final attempt runs on the fallback.
    async fn run_with_retries<T, F, Fut>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut(Arc<dyn VectorBackend>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_error: Option<ZeroRagError> = None;
        for round in 0..RETRY_ATTEMPTS {
            let backend = self.active_backend().await;
            match attempt(backend).await {
                Ok(value) => {
                    self.note_success();
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    self.note_transient_failure(&e).await;
                    last_error = Some(e);
                    if round + 1 < RETRY_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        if self.is_degraded() {
            let backend = self.active_backend().await;
            if let Ok(value) = attempt(backend).await {
                return Ok(value);
            }
        }
        Err(last_error
            .unwrap_or_else(|| ZeroRagError::Internal("retry loop exhausted".into())))
    }

    fn validate_records<'a>(
        &self,
        records: &'a [VectorRecord],
        report: &mut BatchReport,
    ) -> Vec<&'a VectorRecord> {
        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            if record.embedding.len() != self.dim {
                report.failed += 1;
                report.errors.push(format!(
                    "record '{}': dimension {} does not match collection dimension {}",
                    record.id(),
                    record.embedding.len(),
                    self.dim
                ));
            } else if record.embedding.iter().all(|v| *v == 0.0) {
                report.failed += 1;
                report.errors.push(format!("record '{}': zero vector refused", record.id()));
            } else {
                valid.push(record);
            }
        }
        valid
    }

    fn check_memory_between_batches(&self) {
        if let Some((tier, severity, message)) = self.memory.observe(process_rss_mb()) {
            self.alerts.record(
                "memory_usage",
                severity,
                message,
                serde_json::json!({"during": "batch_operation"}),
            );
            self.run_cleanup(tier);
        }
    }

    /// Truncate in-process history buffers according to the cleanup tier.
    fn run_cleanup(&self, tier: CleanupTier) {
        match tier {
            CleanupTier::Light => {
                self.memory.truncate_history();
            }
            CleanupTier::Standard => {
                self.memory.truncate_history();
                self.metrics.truncate_history();
            }
            CleanupTier::Aggressive => {
                self.memory.truncate_history();
                self.metrics.truncate_history();
                self.alerts.truncate();
            }
        }
        debug!(?tier, "store cleanup ran");
    }

    /// Synchronously upsert records, validating dimensions and batching.
    ///
    /// Partial failures do not abort the call: every batch is attempted and
    /// per-record failures are coalesced into the returned report.
    pub async fn upsert(&self, records: &[VectorRecord]) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport { total: records.len(), ..Default::default() };
        let valid = self.validate_records(records, &mut report);

        for batch in valid.chunks(self.config.batch_size.max(1)) {
            let owned: Vec<VectorRecord> = batch.iter().map(|r| (*r).clone()).collect();
            let outcome = self
                .run_with_retries(|backend| {
                    let owned = owned.clone();
                    let collection = self.collection.clone();
                    async move { backend.upsert(&collection, &owned).await }
                })
                .await;
            match outcome {
                Ok(()) => report.succeeded += batch.len(),
                Err(e) => {
                    report.failed += batch.len();
                    report.errors.push(e.to_string());
                }
            }
            self.check_memory_between_batches();
        }

        self.metrics.record(
            "upsert",
            started.elapsed().as_secs_f64() * 1000.0,
            report.is_complete(),
        );
        Ok(report)
    }

    /// Synchronously delete records by id, batching like [`upsert`](Self::upsert).
    /// Unknown ids count as succeeded with zero effect.
    pub async fn delete(&self, ids: &[String]) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport { total: ids.len(), ..Default::default() };

        for batch in ids.chunks(self.config.batch_size.max(1)) {
            let owned: Vec<String> = batch.to_vec();
            let outcome = self
                .run_with_retries(|backend| {
                    let owned = owned.clone();
                    let collection = self.collection.clone();
                    async move { backend.delete(&collection, &owned).await }
                })
                .await;
            match outcome {
                Ok(_affected) => report.succeeded += batch.len(),
                Err(e) => {
                    report.failed += batch.len();
                    report.errors.push(e.to_string());
                }
            }
            self.check_memory_between_batches();
        }

        self.metrics.record(
            "delete",
            started.elapsed().as_secs_f64() * 1000.0,
            report.is_complete(),
        );
        Ok(report)
    }

    /// Queue an upsert for the background worker. Returns a completion
    /// receiver the caller may await or drop.
    ///
    /// # Errors
    ///
    /// [`ZeroRagError::QueueFull`] when the queue is saturated.
    pub fn queue_upsert(
        &self,
        records: Vec<VectorRecord>,
        priority: Priority,
    ) -> Result<oneshot::Receiver<Result<BatchReport>>> {
        let (tx, rx) = oneshot::channel();
        let result = self.queue.push(QueuedOp::UpsertBatch(records), priority, Some(tx));
        if matches!(result, Err(ZeroRagError::QueueFull)) {
            self.alerts.record(
                "queue_full",
                AlertSeverity::High,
                format!("operation queue full: {} items", self.queue.len()),
                serde_json::json!({"capacity": self.queue.capacity()}),
            );
        }
        result.map(|()| rx)
    }

    /// Queue a delete for the background worker; see
    /// [`queue_upsert`](Self::queue_upsert).
    pub fn queue_delete(
        &self,
        ids: Vec<String>,
        priority: Priority,
    ) -> Result<oneshot::Receiver<Result<BatchReport>>> {
        let (tx, rx) = oneshot::channel();
        let result = self.queue.push(QueuedOp::DeleteBatch(ids), priority, Some(tx));
        if matches!(result, Err(ZeroRagError::QueueFull)) {
            self.alerts.record(
                "queue_full",
                AlertSeverity::High,
                format!("operation queue full: {} items", self.queue.len()),
                serde_json::json!({"capacity": self.queue.capacity()}),
            );
        }
        result.map(|()| rx)
    }

    /// Search for the `top_k` nearest chunks.
    ///
    /// Results come back in strictly descending score order with ascending
    /// chunk-id tie breaks, scores clamped into [0, 1]. `score_threshold`
    /// filtering is a pipeline concern and happens after retrieval.
    pub async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        if vector.iter().all(|v| *v == 0.0) {
            return Err(ZeroRagError::Validation("query vector is all zeros".into()));
        }
        let started = Instant::now();
        let outcome = self
            .run_with_retries(|backend| {
                let vector = vector.to_vec();
                let collection = self.collection.clone();
                let filter = filter.cloned();
                async move {
                    backend.search(&collection, &vector, top_k, filter.as_ref()).await
                }
            })
            .await;
        self.metrics.record(
            "search",
            started.elapsed().as_secs_f64() * 1000.0,
            outcome.is_ok(),
        );
        let mut results = outcome?;
        for result in &mut results {
            result.score = result.score.clamp(0.0, 1.0);
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        results.truncate(top_k);
        Ok(results)
    }

    /// Search many query vectors. Vectors are processed in sub-batches of
    /// ten; a failed sub-batch yields empty result lists rather than failing
    /// the whole call.
    pub async fn batch_search(
        &self,
        vectors: &[Vec<f32>],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Vec<Vec<SearchResult>> {
        let mut all = Vec::with_capacity(vectors.len());
        for sub in vectors.chunks(10) {
            for vector in sub {
                match self.search(vector, top_k, filter).await {
                    Ok(results) => all.push(results),
                    Err(e) => {
                        debug!(error = %e, "batch search query failed");
                        all.push(Vec::new());
                    }
                }
            }
        }
        all
    }

    /// Number of stored vectors.
    pub async fn count(&self) -> Result<u64> {
        let backend = self.active_backend().await;
        Ok(backend.stats(&self.collection).await?.points)
    }

    /// Storage statistics for the stats endpoint.
    pub async fn stats(&self) -> Result<StoreStats> {
        let backend = self.active_backend().await;
        let backend_stats = backend.stats(&self.collection).await?;
        Ok(StoreStats {
            backend: backend.name(),
            degraded: self.is_degraded(),
            points: backend_stats.points,
            estimated_size_bytes: backend_stats.estimated_size_bytes,
            queue_size: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            alert_count: self.alerts.len(),
        })
    }

    /// Aggregate health with a 0-100 score. Degraded mode caps the score at
    /// 70 because durability is forfeited on the fallback.
    pub async fn health(&self) -> StoreHealth {
        let degraded = self.is_degraded();
        let backend = self.active_backend().await;
        let mut score: i32 = 100;
        let mut issues = Vec::new();

        let points = match backend.stats(&self.collection).await {
            Ok(stats) => stats.points,
            Err(e) => {
                score -= 30;
                issues.push(format!("backend stats unavailable: {e}"));
                0
            }
        };
        if degraded {
            score -= 30;
            issues.push("running on in-memory fallback; data is not durable".to_string());
        }
        let error_rate = self.metrics.error_rate();
        if error_rate > 0.1 {
            score -= 20;
            issues.push(format!("high error rate: {:.1}%", error_rate * 100.0));
        }
        let memory_mb = self.memory.current_mb();
        if self.memory.over_critical() {
            score -= 15;
            issues.push(format!("memory usage critical: {memory_mb:.1}MB"));
        }
        let queue_size = self.queue.len();
        if queue_size * 2 > self.queue.capacity() {
            score -= 10;
            issues.push(format!("operation queue backlog: {queue_size} items"));
        }

        if degraded {
            score = score.min(DEGRADED_SCORE_CAP);
        }
        score = score.max(0);
        let status = if score >= 90 {
            "healthy"
        } else if score >= 70 {
            "degraded"
        } else if score >= 50 {
            "unhealthy"
        } else {
            "critical"
        };

        StoreHealth {
            status,
            score,
            issues,
            backend: backend.name(),
            backend_up: !degraded,
            degraded,
            memory_mb,
            queue_size,
            points,
        }
    }

    async fn apply_queued(&self, op: QueuedOp) -> Result<BatchReport> {
        match op {
            QueuedOp::UpsertBatch(records) => self.upsert(&records).await,
            QueuedOp::DeleteBatch(ids) => self.delete(&ids).await,
        }
    }

    /// Spawn the store's background services: the single queue worker, the
    /// memory monitor, and the periodic compaction tick. The returned
    /// handles are owned by the caller for lifecycle control.
    pub fn start_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let store = self.clone();
        handles.push(tokio::spawn(async move {
            while let Some(item) = store.queue.pop_wait().await {
                let waited_ms =
                    (chrono::Utc::now() - item.enqueued_at).num_milliseconds();
                debug!(op = item.op.kind(), waited_ms, "processing queued operation");
                let result = store.apply_queued(item.op).await;
                if let Err(e) = &result {
                    error!(error = %e, "queued operation failed");
                }
                if let Some(tx) = item.completion {
                    if tx.send(result).is_err() {
                        debug!("queued operation completion receiver dropped");
                    }
                }
            }
            info!("queue worker drained and stopped");
        }));

        let store = self.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Some((tier, severity, message)) =
                    store.memory.observe(process_rss_mb())
                {
                    store.alerts.record(
                        "memory_usage",
                        severity,
                        message,
                        serde_json::json!({"source": "monitor"}),
                    );
                    store.run_cleanup(tier);
                }
            }
        }));

        let store = self.clone();
        let gc_interval = Duration::from_secs(self.config.gc_interval_seconds.max(1));
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gc_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.metrics.truncate_history();
                store.memory.truncate_history();
                debug!("compaction tick pruned metrics history");
            }
        }));

        handles
    }

    /// Stop accepting queued work. The queue worker exits once drained;
    /// callers await its handle (with a deadline) to finish the drain.
    pub async fn close(&self) {
        self.queue.close();
        self.primary.close().await;
        self.fallback.close().await;
    }
}
