//! Request, response, and streaming event types for the RAG pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZeroRagError};

/// Query classification driving prompt-template selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    General,
    Factual,
    Analytical,
    Comparative,
    Summarization,
    Creative,
}

/// Requested structure of the generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    BulletPoints,
    NumberedList,
    Table,
    Json,
    Summary,
}

/// How strict the safety block in the prompt should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    #[default]
    Standard,
    Conservative,
    Permissive,
}

/// Aggregate verdict of response validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Warning,
    Error,
}

/// A RAG query with retrieval and generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQuery {
    #[serde(alias = "query")]
    pub query_text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_true")]
    pub include_sources: bool,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default)]
    pub safety_level: SafetyLevel,
    /// Explicit classification override; classified from the text when
    /// absent.
    #[serde(default)]
    pub query_type: Option<QueryType>,
    /// Restrict retrieval to these parent documents.
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.7
}
fn default_max_context_length() -> usize {
    4000
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_true() -> bool {
    true
}

impl RagQuery {
    /// A query over default parameters.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            max_context_length: default_max_context_length(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            include_sources: true,
            response_format: ResponseFormat::default(),
            safety_level: SafetyLevel::default(),
            query_type: None,
            document_ids: None,
        }
    }

    /// Check every request bound, trimming the query text first.
    ///
    /// # Errors
    ///
    /// [`ZeroRagError::Validation`] naming the first violated bound.
    pub fn validate(&self) -> Result<()> {
        let trimmed = self.query_text.trim();
        if trimmed.is_empty() {
            return Err(ZeroRagError::Validation("query must not be empty".into()));
        }
        if trimmed.chars().count() > 1000 {
            return Err(ZeroRagError::Validation(
                "query must be at most 1000 characters".into(),
            ));
        }
        if !(1..=20).contains(&self.top_k) {
            return Err(ZeroRagError::Validation("top_k must be between 1 and 20".into()));
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(ZeroRagError::Validation(
                "score_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if !(1000..=8000).contains(&self.max_context_length) {
            return Err(ZeroRagError::Validation(
                "max_context_length must be between 1000 and 8000".into(),
            ));
        }
        if !(100..=4096).contains(&self.max_tokens) {
            return Err(ZeroRagError::Validation(
                "max_tokens must be between 100 and 4096".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ZeroRagError::Validation(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        Ok(())
    }
}

/// A source citation attached to a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub file_name: String,
    pub chunk_index: usize,
    /// Short excerpt of the cited chunk.
    pub snippet: String,
    pub score: f32,
}

/// The answer to a RAG query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    /// Sources actually packed into the prompt, in packing order. Empty when
    /// the request opted out of sources.
    pub sources: Vec<SourceRef>,
    pub response_time_ms: u64,
    pub tokens_used: Option<u32>,
    pub validation_status: ValidationStatus,
    /// 1.0 is clean; lowered when safety patterns match the answer.
    pub safety_score: f32,
    pub query_type: QueryType,
    pub metadata: serde_json::Value,
}

/// Typed events emitted by the streaming path, in order: optional
/// `progress`, one `sources`, `content` fragments, optional `error`, and a
/// final `end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress { stage: String },
    Sources { sources: Vec<SourceRef> },
    Content { text: String },
    Error { message: String },
    End { truncated: bool, response_time_ms: u64, tokens_used: Option<u32> },
}

impl StreamEvent {
    /// SSE event name for this payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Sources { .. } => "sources",
            Self::Content { .. } => "content",
            Self::Error { .. } => "error",
            Self::End { .. } => "end",
        }
    }
}
