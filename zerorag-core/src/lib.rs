//! ZeroRAG core engine.
//!
//! A Retrieval-Augmented Generation serving core: the document pipeline
//! (parse → normalize → chunk → embed → index), a vector store with a
//! pluggable backend and transparent in-memory fallback, and the RAG
//! pipeline that retrieves, packs context, prompts, generates, and
//! validates answers. The HTTP surface lives in `zerorag-server`.
//!
//! External collaborators are consumed through three traits:
//! [`embedding::Embedder`], [`generation::Generator`], and
//! [`backend::VectorBackend`].

pub mod backend;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod inmemory;
pub mod parse;
pub mod qdrant;
pub mod rag;
pub mod store;

pub use backend::{BackendStats, SearchFilter, VectorBackend};
pub use config::AppConfig;
pub use document::{Chunk, DocumentMetadata, DocumentStatus, SearchResult, VectorRecord};
pub use embedding::Embedder;
pub use error::{Result, ZeroRagError};
pub use generation::Generator;
pub use ingest::DocumentPipeline;
pub use inmemory::InMemoryBackend;
pub use qdrant::QdrantBackend;
pub use rag::types::{RagQuery, RagResponse, StreamEvent};
pub use rag::RagPipeline;
pub use store::queue::Priority;
pub use store::VectorStore;
