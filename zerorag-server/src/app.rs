//! Application composition and lifecycle.
//!
//! [`App`] is the explicit composition root: adapters, store, pipelines,
//! and background workers are built at startup and passed by reference.
//! Nothing is discovered at runtime and there are no global singletons.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zerorag_core::embedding::{CachedEmbedder, RestEmbedder};
use zerorag_core::generation::OllamaGenerator;
use zerorag_core::{
    AppConfig, DocumentPipeline, Embedder, Generator, QdrantBackend, RagPipeline, VectorBackend,
    VectorStore,
};

use crate::connections::ConnectionManager;
use crate::rate_limit::RateLimiter;
use crate::routes;

/// Cadence of the connection reaper and limiter pruning.
const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// How long shutdown waits for the operation queue to drain.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// Request counters for the metrics endpoint.
#[derive(Default)]
pub struct HttpMetrics {
    pub total_requests: AtomicU64,
    pub failed_requests: AtomicU64,
}

impl HttpMetrics {
    pub fn record(&self, failed: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The composed application.
pub struct App {
    pub config: Arc<AppConfig>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub store: Arc<VectorStore>,
    pub documents: Arc<DocumentPipeline>,
    pub rag: Arc<RagPipeline>,
    pub connections: Arc<ConnectionManager>,
    pub query_limiter: RateLimiter,
    pub upload_limiter: RateLimiter,
    pub http_metrics: HttpMetrics,
    started_at: Instant,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Compose an application from explicit collaborators. This is the seam
    /// tests use to inject mock embedders, generators, and backends.
    pub async fn compose(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        backend: Arc<dyn VectorBackend>,
    ) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);
        let store = Arc::new(VectorStore::new(&config, backend));
        store.open().await.context("vector store startup failed")?;

        let documents = Arc::new(
            DocumentPipeline::new(&config, embedder.clone(), store.clone())
                .context("document pipeline construction failed")?,
        );
        let rag = Arc::new(RagPipeline::new(
            &config.rag,
            embedder.clone(),
            generator.clone(),
            store.clone(),
        ));

        Ok(Arc::new(Self {
            query_limiter: RateLimiter::new(config.api.rate_limit_per_minute),
            upload_limiter: RateLimiter::new(config.api.upload_rate_limit_per_minute),
            embedder,
            generator,
            store,
            documents,
            rag,
            connections: Arc::new(ConnectionManager::new()),
            http_metrics: HttpMetrics::default(),
            started_at: Instant::now(),
            workers: Mutex::new(Vec::new()),
            config,
        }))
    }

    /// Build the production application from configuration: REST embedder
    /// (with the advisory cache), Ollama generator, Qdrant backend.
    pub async fn build(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let rest = Arc::new(RestEmbedder::new(
            &config.models.embedder_url,
            &config.models.embedder_model,
            config.database.embedding_dim,
        ));
        let embedder: Arc<dyn Embedder> = if config.models.embedding_cache_size > 0 {
            Arc::new(CachedEmbedder::new(rest, config.models.embedding_cache_size))
        } else {
            rest
        };
        let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(
            &config.models.generator_url,
            &config.models.generator_model,
            Duration::from_secs(config.models.generator_timeout_secs),
        ));
        let backend: Arc<dyn VectorBackend> = Arc::new(
            QdrantBackend::new(
                &config.database.qdrant_url,
                config.database.qdrant_api_key.as_deref(),
                config.database.embedding_dim,
            )
            .context("qdrant client construction failed")?,
        );

        // Readiness probes are advisory at startup; the engine still serves
        // fallback answers while models come up.
        if !embedder.health().await {
            warn!(url = %config.models.embedder_url, "embedder not reachable at startup");
        }
        if !generator.health().await {
            warn!(url = %config.models.generator_url, "generator not reachable at startup");
        }

        Self::compose(config, embedder, generator, backend).await
    }

    /// Start the background workers: store services (queue worker, memory
    /// monitor, gc tick) plus the connection reaper.
    pub async fn start_background(self: &Arc<Self>) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }
        workers.extend(self.store.start_workers());

        let app = self.clone();
        workers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAPER_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let timeout = app.config.api.stream_connection_timeout_minutes;
                let reaped = app.connections.reap_idle(timeout);
                if reaped > 0 {
                    info!(reaped, "closed idle streaming connections");
                }
                app.query_limiter.prune(3600);
                app.upload_limiter.prune(3600);
            }
        }));
        info!("background workers started");
    }

    /// Graceful shutdown: stop queueing, drain the worker for a bounded
    /// time, stop the rest, close backends.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.store.close().await;
        let mut workers = self.workers.lock().await;
        // The queue worker is first; give it the drain deadline, then stop
        // everything still running.
        if let Some(queue_worker) = workers.first_mut() {
            if tokio::time::timeout(DRAIN_DEADLINE, queue_worker).await.is_err() {
                warn!("operation queue did not drain before the deadline");
            }
        }
        for worker in workers.iter() {
            worker.abort();
        }
        workers.clear();
        info!("shutdown complete");
    }

    /// Seconds since the app was composed.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Bind and serve until ctrl-c, then shut the app down.
pub async fn serve(app: Arc<App>) -> anyhow::Result<()> {
    app.start_background().await;

    let router = routes::router(app.clone());
    let addr = format!("{}:{}", app.config.api.host, app.config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "zerorag server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received, stopping accept loop");
        })
        .await?;

    app.shutdown().await;
    Ok(())
}
