//! Generation provider trait and adapters.
//!
//! [`Generator`] is the seam between the RAG pipeline and the concrete LLM.
//! [`OllamaGenerator`] speaks the Ollama `/api/generate` protocol over
//! `reqwest` with newline-delimited JSON streaming; dropping a returned
//! [`TokenStream`] aborts the underlying request, which is how cooperative
//! cancellation reaches the model server.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Result, ZeroRagError};

/// A completed generation with usage accounting when the backend reports it.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub tokens_used: Option<u32>,
}

/// An ordered stream of generated token fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a full completion for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Generation>;

    /// Generate a completion as an ordered token stream.
    async fn stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<TokenStream>;

    /// Whether the backend is currently reachable.
    async fn health(&self) -> bool;
}

// ── Ollama adapter ─────────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// A [`Generator`] backed by an Ollama server.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            timeout,
        }
    }

    async fn send(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaRequest {
            model: &self.model,
            prompt,
            stream,
            options: OllamaOptions { temperature, num_predict: max_tokens },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ZeroRagError::transient("generator", e.to_string())
                } else {
                    ZeroRagError::permanent("generator", e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(%status, "generation request failed");
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(ZeroRagError::transient("generator", format!("{status}: {detail}")))
            } else {
                Err(ZeroRagError::permanent("generator", format!("{status}: {detail}")))
            };
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Generation> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "generating completion");
        let response = self.send(prompt, max_tokens, temperature, false).await?;
        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ZeroRagError::permanent("generator", format!("bad response: {e}")))?;
        Ok(Generation { text: parsed.response, tokens_used: parsed.eval_count })
    }

    async fn stream(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<TokenStream> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "starting token stream");
        let response = self.send(prompt, max_tokens, temperature, true).await?;

        // Ollama streams one JSON object per line; carry partial lines
        // between network reads.
        let stream = futures::stream::unfold(
            (Box::pin(response.bytes_stream()), String::new(), false),
            |(mut bytes, mut buffer, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(newline) = buffer.find('\n') {
                        let line: String = buffer.drain(..=newline).collect();
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        return match serde_json::from_str::<OllamaResponse>(line) {
                            Ok(chunk) => {
                                let finished = chunk.done;
                                Some((Ok(chunk.response), (bytes, buffer, finished)))
                            }
                            Err(e) => Some((
                                Err(ZeroRagError::permanent(
                                    "generator",
                                    format!("bad stream chunk: {e}"),
                                )),
                                (bytes, buffer, true),
                            )),
                        };
                    }
                    match bytes.next().await {
                        Some(Ok(data)) => {
                            buffer.push_str(&String::from_utf8_lossy(&data));
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(ZeroRagError::transient("generator", e.to_string())),
                                (bytes, buffer, true),
                            ));
                        }
                        None => {
                            let tail = buffer.trim().to_string();
                            buffer.clear();
                            if tail.is_empty() {
                                return None;
                            }
                            return match serde_json::from_str::<OllamaResponse>(&tail) {
                                Ok(chunk) => Some((Ok(chunk.response), (bytes, buffer, true))),
                                Err(_) => None,
                            };
                        }
                    }
                }
            },
        )
        .filter(|item| {
            let keep = !matches!(item, Ok(text) if text.is_empty());
            futures::future::ready(keep)
        });

        Ok(Box::pin(stream))
    }

    async fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(
            self.client.get(&url).timeout(Duration::from_secs(5)).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

// ── Mock ───────────────────────────────────────────────────────────

/// Scripted generator for tests: returns a fixed answer, streamed word by
/// word.
pub struct MockGenerator {
    answer: String,
}

impl MockGenerator {
    pub fn new(answer: impl Into<String>) -> Self {
        Self { answer: answer.into() }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Generation> {
        Ok(Generation {
            text: self.answer.clone(),
            tokens_used: Some(self.answer.split_whitespace().count() as u32),
        })
    }

    async fn stream(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<TokenStream> {
        let words: Vec<Result<String>> = self
            .answer
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(words)))
    }

    async fn health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_generates_and_streams_same_text() {
        let generator = MockGenerator::new("the vacation policy allows ten days");
        let full = generator.generate("q", 100, 0.7).await.unwrap();
        assert_eq!(full.text, "the vacation policy allows ten days");
        assert_eq!(full.tokens_used, Some(6));

        let mut stream = generator.stream("q", 100, 0.7).await.unwrap();
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, full.text);
    }
}
