//! Text normalization and sentence-aware chunking.
//!
//! The chunker walks the normalized text in strides of `chunk_size`
//! characters and, where possible, pulls each cut back onto a sentence
//! boundary so chunks read as coherent passages. Consecutive chunks overlap
//! by up to `chunk_overlap` characters of source text while remaining a
//! strictly ordered, gap-free sequence of indexes.

use std::collections::HashMap;

use crate::document::Chunk;
use crate::error::{Result, ZeroRagError};

/// How far back from a stride end the chunker searches for sentence-ending
/// punctuation, as a function of chunk size.
fn sentence_lookback(chunk_size: usize) -> usize {
    100.min(chunk_size / 2)
}

/// Collapse whitespace to single spaces while preserving paragraph breaks as
/// double newlines; strips control characters and normalizes line endings.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let cleaned: String = unified
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in cleaned.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.extend(line.split_whitespace());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs.join("\n\n")
}

/// Split text into sentences at `.`, `!`, or `?` followed by whitespace.
/// A trailing fragment without terminal punctuation counts as a sentence.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let boundary = match chars.peek() {
                Some((_, next)) => next.is_whitespace(),
                None => true,
            };
            if boundary {
                let end = i + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }
    if start < bytes.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

/// A `[start, end)` character span within the normalized text.
pub type CharSpan = (usize, usize);

/// Sentence-aware chunker with configurable size and overlap.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SentenceChunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// Returns [`ZeroRagError::Validation`] if `chunk_overlap >= chunk_size`
    /// or `chunk_size` is zero.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ZeroRagError::Validation("chunk_size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ZeroRagError::Validation(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Compute the chunk spans for a text, in character offsets.
    ///
    /// Invariants: spans are emitted in order, each span starts at or after
    /// the previous span's start and at or before its end (overlap only),
    /// the first span starts at 0, and the last span ends at the text length.
    pub fn split_spans(&self, text: &str) -> Vec<CharSpan> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }
        if total <= self.chunk_size {
            return vec![(0, total)];
        }

        let mut spans = Vec::new();
        let mut start = 0;
        loop {
            let stride_end = (start + self.chunk_size).min(total);
            let mut end = stride_end;
            if stride_end < total {
                let floor = stride_end
                    .saturating_sub(sentence_lookback(self.chunk_size))
                    .max(start + 1);
                if let Some(cut) =
                    (floor..stride_end).rev().find(|&i| matches!(chars[i], '.' | '!' | '?'))
                {
                    end = cut + 1;
                }
            }
            spans.push((start, end));
            if end >= total {
                break;
            }
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }
        spans
    }

    /// Chunk a document's normalized text into [`Chunk`]s.
    ///
    /// Each chunk carries the shared `base_metadata` tags. The caller is
    /// responsible for enforcing any upper bound on the chunk count.
    pub fn chunk(
        &self,
        source_document_id: &str,
        text: &str,
        base_metadata: &HashMap<String, String>,
    ) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        self.split_spans(text)
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let chunk_text: String = chars[start..end].iter().collect();
                Chunk::new(
                    source_document_id,
                    index,
                    chunk_text,
                    start,
                    end,
                    base_metadata.clone(),
                )
            })
            .collect()
    }
}
