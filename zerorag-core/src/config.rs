//! Typed, environment-sourced configuration.
//!
//! [`AppConfig`] is loaded once at startup via [`AppConfig::from_env`] and is
//! immutable afterwards; there is no live reconfiguration. Validation collects
//! every violated invariant into a single error message so operators can fix
//! a broken environment in one pass instead of replaying startup failures.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZeroRagError};

/// Vector database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Qdrant gRPC endpoint.
    pub qdrant_url: String,
    /// Optional Qdrant API key.
    pub qdrant_api_key: Option<String>,
    /// Collection holding all document chunks.
    pub collection_name: String,
    /// Vector dimension for the collection; must match the embedder.
    pub embedding_dim: usize,
}

/// Embedding and generation model endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Base URL of the embedding server.
    pub embedder_url: String,
    /// Embedding model name.
    pub embedder_model: String,
    /// Base URL of the generation server.
    pub generator_url: String,
    /// Generation model name.
    pub generator_model: String,
    /// Request timeout for generation calls, in seconds.
    pub generator_timeout_secs: u64,
    /// Number of chunk texts embedded per request.
    pub embedding_batch_size: usize,
    /// Capacity of the advisory embedding cache; 0 disables it.
    pub embedding_cache_size: usize,
}

/// Document ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentConfig {
    /// Upload rejection threshold in bytes.
    pub max_file_size: u64,
    /// Allowed file extensions, without the leading dot.
    pub supported_formats: Vec<String>,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Character overlap between consecutive chunks; must be < `chunk_size`.
    pub chunk_overlap: usize,
    /// Hard upper bound on chunks per document; excess fails the ingest.
    pub max_chunks_per_document: usize,
}

/// RAG pipeline defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Default number of chunks retrieved per query.
    pub top_k: usize,
    /// Default minimum similarity score for retained results.
    pub score_threshold: f32,
    /// Default context budget in characters.
    pub max_context_length: usize,
    /// Per-query deadline in seconds.
    pub query_timeout_secs: u64,
}

/// Vector store batching and memory discipline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Batch size for bulk upsert/delete operations.
    pub batch_size: usize,
    /// Bounded capacity of the background operation queue.
    pub max_queue_size: usize,
    /// RSS threshold (MB) above which standard cleanup runs.
    pub memory_threshold_mb: u64,
    /// RSS threshold (MB) above which aggressive cleanup runs.
    pub memory_critical_threshold_mb: u64,
    /// Cadence of the periodic compaction tick, in seconds.
    pub gc_interval_seconds: u64,
    /// Consecutive transient backend failures before degrading to memory.
    pub backend_failure_threshold: u32,
}

/// HTTP service policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Optional API key gating mutating endpoints.
    pub api_key: Option<String>,
    /// Query rate limit per remote address, per minute.
    pub rate_limit_per_minute: u32,
    /// Upload rate limit per remote address, per minute.
    pub upload_rate_limit_per_minute: u32,
    /// Idle cutoff for the streaming-connection reaper, in minutes.
    pub stream_connection_timeout_minutes: u64,
    /// Deadline for background document processing, in seconds.
    pub upload_timeout_secs: u64,
}

/// The complete, validated application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub models: ModelConfig,
    pub document: DocumentConfig,
    pub rag: RagConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T, errors: &mut Vec<String>) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                errors.push(format!("{key}: cannot parse '{raw}'"));
                default
            }
        },
        Err(_) => default,
    }
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env_string(key, default)
        .split(',')
        .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a human-readable size string (`50MB`, `512KB`, `1GB`, or raw bytes).
pub fn parse_size(raw: &str) -> Option<u64> {
    let upper = raw.trim().to_ascii_uppercase();
    let (digits, multiplier) = if let Some(stripped) = upper.strip_suffix("GB") {
        (stripped, 1024 * 1024 * 1024)
    } else if let Some(stripped) = upper.strip_suffix("MB") {
        (stripped, 1024 * 1024)
    } else if let Some(stripped) = upper.strip_suffix("KB") {
        (stripped, 1024)
    } else if let Some(stripped) = upper.strip_suffix('B') {
        (stripped, 1)
    } else {
        (upper.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                qdrant_url: "http://localhost:6334".to_string(),
                qdrant_api_key: None,
                collection_name: "zero_rag_documents".to_string(),
                embedding_dim: 384,
            },
            models: ModelConfig {
                embedder_url: "http://localhost:11434".to_string(),
                embedder_model: "all-minilm".to_string(),
                generator_url: "http://localhost:11434".to_string(),
                generator_model: "llama3.2:1b".to_string(),
                generator_timeout_secs: 30,
                embedding_batch_size: 32,
                embedding_cache_size: 1024,
            },
            document: DocumentConfig {
                max_file_size: 50 * 1024 * 1024,
                supported_formats: vec!["txt".into(), "csv".into(), "md".into()],
                chunk_size: 1000,
                chunk_overlap: 200,
                max_chunks_per_document: 1000,
            },
            rag: RagConfig {
                top_k: 5,
                score_threshold: 0.7,
                max_context_length: 4000,
                query_timeout_secs: 60,
            },
            store: StoreConfig {
                batch_size: 64,
                max_queue_size: 1000,
                memory_threshold_mb: 1024,
                memory_critical_threshold_mb: 2048,
                gc_interval_seconds: 300,
                backend_failure_threshold: 3,
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                cors_origins: vec!["*".to_string()],
                api_key: None,
                rate_limit_per_minute: 60,
                upload_rate_limit_per_minute: 10,
                stream_connection_timeout_minutes: 30,
                upload_timeout_secs: 300,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults, then validate.
    ///
    /// # Errors
    ///
    /// Returns [`ZeroRagError::Validation`] listing every parse failure and
    /// violated invariant.
    pub fn from_env() -> Result<Self> {
        let mut errors = Vec::new();
        let defaults = Self::default();

        let max_file_size = {
            let raw = env_string("MAX_FILE_SIZE", "50MB");
            match parse_size(&raw) {
                Some(bytes) => bytes,
                None => {
                    errors.push(format!("MAX_FILE_SIZE: cannot parse '{raw}'"));
                    defaults.document.max_file_size
                }
            }
        };

        let config = Self {
            database: DatabaseConfig {
                qdrant_url: env_string("QDRANT_URL", &defaults.database.qdrant_url),
                qdrant_api_key: env_opt("QDRANT_API_KEY"),
                collection_name: env_string(
                    "QDRANT_COLLECTION_NAME",
                    &defaults.database.collection_name,
                ),
                embedding_dim: env_parse(
                    "EMBEDDING_DIM",
                    defaults.database.embedding_dim,
                    &mut errors,
                ),
            },
            models: ModelConfig {
                embedder_url: env_string("EMBEDDER_URL", &defaults.models.embedder_url),
                embedder_model: env_string("EMBEDDER_MODEL", &defaults.models.embedder_model),
                generator_url: env_string("GENERATOR_URL", &defaults.models.generator_url),
                generator_model: env_string("GENERATOR_MODEL", &defaults.models.generator_model),
                generator_timeout_secs: env_parse(
                    "GENERATOR_TIMEOUT_SECS",
                    defaults.models.generator_timeout_secs,
                    &mut errors,
                ),
                embedding_batch_size: env_parse(
                    "EMBEDDING_BATCH_SIZE",
                    defaults.models.embedding_batch_size,
                    &mut errors,
                ),
                embedding_cache_size: env_parse(
                    "EMBEDDING_CACHE_SIZE",
                    defaults.models.embedding_cache_size,
                    &mut errors,
                ),
            },
            document: DocumentConfig {
                max_file_size,
                supported_formats: env_list("SUPPORTED_FORMATS", "txt,csv,md"),
                chunk_size: env_parse("CHUNK_SIZE", defaults.document.chunk_size, &mut errors),
                chunk_overlap: env_parse(
                    "CHUNK_OVERLAP",
                    defaults.document.chunk_overlap,
                    &mut errors,
                ),
                max_chunks_per_document: env_parse(
                    "MAX_CHUNKS_PER_DOCUMENT",
                    defaults.document.max_chunks_per_document,
                    &mut errors,
                ),
            },
            rag: RagConfig {
                top_k: env_parse("TOP_K_RESULTS", defaults.rag.top_k, &mut errors),
                score_threshold: env_parse(
                    "SCORE_THRESHOLD",
                    defaults.rag.score_threshold,
                    &mut errors,
                ),
                max_context_length: env_parse(
                    "MAX_CONTEXT_LENGTH",
                    defaults.rag.max_context_length,
                    &mut errors,
                ),
                query_timeout_secs: env_parse(
                    "QUERY_TIMEOUT_SECS",
                    defaults.rag.query_timeout_secs,
                    &mut errors,
                ),
            },
            store: StoreConfig {
                batch_size: env_parse("BATCH_SIZE", defaults.store.batch_size, &mut errors),
                max_queue_size: env_parse(
                    "MAX_QUEUE_SIZE",
                    defaults.store.max_queue_size,
                    &mut errors,
                ),
                memory_threshold_mb: env_parse(
                    "MEMORY_THRESHOLD_MB",
                    defaults.store.memory_threshold_mb,
                    &mut errors,
                ),
                memory_critical_threshold_mb: env_parse(
                    "MEMORY_CRITICAL_THRESHOLD_MB",
                    defaults.store.memory_critical_threshold_mb,
                    &mut errors,
                ),
                gc_interval_seconds: env_parse(
                    "GC_INTERVAL_SECONDS",
                    defaults.store.gc_interval_seconds,
                    &mut errors,
                ),
                backend_failure_threshold: env_parse(
                    "BACKEND_FAILURE_THRESHOLD",
                    defaults.store.backend_failure_threshold,
                    &mut errors,
                ),
            },
            api: ApiConfig {
                host: env_string("API_HOST", &defaults.api.host),
                port: env_parse("API_PORT", defaults.api.port, &mut errors),
                cors_origins: env_string("CORS_ORIGINS", "*")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                api_key: env_opt("API_KEY"),
                rate_limit_per_minute: env_parse(
                    "RATE_LIMIT_PER_MINUTE",
                    defaults.api.rate_limit_per_minute,
                    &mut errors,
                ),
                upload_rate_limit_per_minute: env_parse(
                    "UPLOAD_RATE_LIMIT_PER_MINUTE",
                    defaults.api.upload_rate_limit_per_minute,
                    &mut errors,
                ),
                stream_connection_timeout_minutes: env_parse(
                    "STREAM_CONNECTION_TIMEOUT_MINUTES",
                    defaults.api.stream_connection_timeout_minutes,
                    &mut errors,
                ),
                upload_timeout_secs: env_parse(
                    "UPLOAD_TIMEOUT_SECS",
                    defaults.api.upload_timeout_secs,
                    &mut errors,
                ),
            },
        };

        errors.extend(config.invariant_violations());
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ZeroRagError::Validation(errors.join("; ")))
        }
    }

    /// Check every configuration invariant, returning a message per violation.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.database.embedding_dim == 0 {
            errors.push("EMBEDDING_DIM must be positive".to_string());
        }
        if self.document.chunk_size == 0 {
            errors.push("CHUNK_SIZE must be positive".to_string());
        }
        if self.document.chunk_overlap >= self.document.chunk_size {
            errors.push(format!(
                "CHUNK_OVERLAP ({}) must be less than CHUNK_SIZE ({})",
                self.document.chunk_overlap, self.document.chunk_size
            ));
        }
        if self.document.max_file_size == 0 {
            errors.push("MAX_FILE_SIZE must be positive".to_string());
        }
        if self.document.supported_formats.is_empty() {
            errors.push("SUPPORTED_FORMATS must list at least one extension".to_string());
        }
        if self.document.max_chunks_per_document == 0 {
            errors.push("MAX_CHUNKS_PER_DOCUMENT must be positive".to_string());
        }
        if self.rag.top_k == 0 {
            errors.push("TOP_K_RESULTS must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.rag.score_threshold) {
            errors.push("SCORE_THRESHOLD must be between 0.0 and 1.0".to_string());
        }
        if self.store.batch_size == 0 {
            errors.push("BATCH_SIZE must be positive".to_string());
        }
        if self.store.max_queue_size == 0 {
            errors.push("MAX_QUEUE_SIZE must be positive".to_string());
        }
        if self.store.memory_critical_threshold_mb < self.store.memory_threshold_mb {
            errors.push(
                "MEMORY_CRITICAL_THRESHOLD_MB must be >= MEMORY_THRESHOLD_MB".to_string(),
            );
        }
        if self.store.backend_failure_threshold == 0 {
            errors.push("BACKEND_FAILURE_THRESHOLD must be positive".to_string());
        }
        if self.api.port == 0 {
            errors.push("API_PORT must be between 1 and 65535".to_string());
        }
        if self.api.rate_limit_per_minute == 0 || self.api.upload_rate_limit_per_minute == 0 {
            errors.push("rate limits must be positive".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("50MB"), Some(50 * 1024 * 1024));
        assert_eq!(parse_size("512KB"), Some(512 * 1024));
        assert_eq!(parse_size("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("100B"), Some(100));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(AppConfig::default().invariant_violations().is_empty());
    }

    #[test]
    fn overlap_must_be_less_than_chunk_size() {
        let mut config = AppConfig::default();
        config.document.chunk_overlap = config.document.chunk_size;
        let violations = config.invariant_violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("CHUNK_OVERLAP"));
    }

    #[test]
    fn violations_are_collected_not_short_circuited() {
        let mut config = AppConfig::default();
        config.rag.top_k = 0;
        config.store.batch_size = 0;
        config.api.port = 0;
        assert_eq!(config.invariant_violations().len(), 3);
    }
}
