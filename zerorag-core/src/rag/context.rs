//! Context packing under a character budget.

use crate::chunking::split_sentences;
use crate::document::SearchResult;
use crate::rag::types::SourceRef;

/// Minimum characters a truncated final candidate must keep to be included.
const MIN_TRUNCATED_CHARS: usize = 200;

/// Characters of chunk text quoted in a source snippet.
const SNIPPET_CHARS: usize = 200;

/// The packed context string plus the sources that made it in.
#[derive(Debug, Clone, Default)]
pub struct PackedContext {
    /// Concatenated context sections handed to the prompt engine.
    pub text: String,
    /// Sources actually used, in packing order.
    pub sources: Vec<SourceRef>,
    /// Character length of `text`.
    pub char_length: usize,
}

impl PackedContext {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn section_header(position: usize, result: &SearchResult) -> String {
    let file_name = result
        .chunk
        .metadata
        .get("file_name")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Document {position}: {file_name} (Relevance: {score:.3}) | Chunk {index} | Content: ",
        score = result.score,
        index = result.chunk.chunk_index,
    )
}

fn source_ref(result: &SearchResult) -> SourceRef {
    SourceRef {
        chunk_id: result.chunk.id.clone(),
        file_name: result
            .chunk
            .metadata
            .get("file_name")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()),
        chunk_index: result.chunk.chunk_index,
        snippet: result.chunk.text.chars().take(SNIPPET_CHARS).collect(),
        score: result.score,
    }
}

/// Truncate `text` to at most `budget` characters on a sentence boundary.
/// Returns `None` when no boundary leaves at least [`MIN_TRUNCATED_CHARS`].
fn truncate_on_sentence(text: &str, budget: usize) -> Option<String> {
    let mut kept = String::new();
    for sentence in split_sentences(text) {
        let candidate_len = if kept.is_empty() {
            sentence.chars().count()
        } else {
            kept.chars().count() + 1 + sentence.chars().count()
        };
        if candidate_len > budget {
            break;
        }
        if !kept.is_empty() {
            kept.push(' ');
        }
        kept.push_str(sentence);
    }
    if kept.chars().count() >= MIN_TRUNCATED_CHARS {
        Some(kept)
    } else {
        None
    }
}

/// Greedily pack results (already sorted by descending score) under
/// `max_context_length` characters. The final candidate may be truncated on
/// a sentence boundary if enough of it survives; otherwise it is skipped.
pub fn pack_context(results: &[SearchResult], max_context_length: usize) -> PackedContext {
    let mut packed = PackedContext::default();
    let mut used_chars = 0usize;

    for result in results {
        let header = section_header(packed.sources.len() + 1, result);
        let header_chars = header.chars().count() + 1;
        let text_chars = result.chunk.text.chars().count();

        if used_chars + header_chars + text_chars <= max_context_length {
            packed.text.push_str(&header);
            packed.text.push_str(&result.chunk.text);
            packed.text.push('\n');
            used_chars += header_chars + text_chars;
            packed.sources.push(source_ref(result));
            continue;
        }

        // Out of room: try a sentence-boundary truncation of this candidate,
        // then stop either way.
        let remaining = max_context_length.saturating_sub(used_chars + header_chars);
        if let Some(truncated) = truncate_on_sentence(&result.chunk.text, remaining) {
            packed.text.push_str(&header);
            packed.text.push_str(&truncated);
            packed.text.push('\n');
            used_chars += header_chars + truncated.chars().count();
            let mut source = source_ref(result);
            source.snippet = truncated.chars().take(SNIPPET_CHARS).collect();
            packed.sources.push(source);
        }
        break;
    }

    packed.char_length = used_chars;
    packed
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::Chunk;

    fn result(file: &str, index: usize, text: &str, score: f32) -> SearchResult {
        let mut metadata = HashMap::new();
        metadata.insert("file_name".to_string(), file.to_string());
        SearchResult {
            chunk: Chunk::new("doc", index, text.to_string(), 0, text.len(), metadata),
            score,
        }
    }

    #[test]
    fn packs_in_order_with_headers() {
        let results = vec![
            result("a.txt", 0, "First chunk text here.", 0.9),
            result("b.txt", 1, "Second chunk text here.", 0.8),
        ];
        let packed = pack_context(&results, 4000);
        assert_eq!(packed.sources.len(), 2);
        assert!(packed.text.contains("Document 1: a.txt (Relevance: 0.900)"));
        assert!(packed.text.contains("Document 2: b.txt (Relevance: 0.800)"));
        assert!(packed.text.contains("Chunk 0"));
        assert!(packed.char_length <= 4000);
    }

    #[test]
    fn budget_stops_packing() {
        let long = "sentence goes here. ".repeat(50);
        let results = vec![
            result("a.txt", 0, &long, 0.9),
            result("b.txt", 0, &long, 0.8),
            result("c.txt", 0, &long, 0.7),
        ];
        let packed = pack_context(&results, 1200);
        assert!(packed.sources.len() < 3);
        assert!(packed.char_length <= 1200);
    }

    #[test]
    fn final_candidate_truncates_on_sentence_when_room_allows() {
        let filler = "x".repeat(700);
        let tail = "Alpha sentence one is long enough to matter. ".repeat(10);
        let results =
            vec![result("a.txt", 0, &filler, 0.9), result("b.txt", 0, &tail, 0.8)];
        let packed = pack_context(&results, 1100);
        assert_eq!(packed.sources.len(), 2);
        let truncated_part =
            packed.text.split("Document 2").nth(1).expect("second section present");
        assert!(truncated_part.trim_end().ends_with('.'), "cut must land on a sentence end");
        assert!(
            truncated_part.len() < tail.len(),
            "second section must actually be truncated"
        );
        assert!(packed.char_length <= 1100);
    }

    #[test]
    fn tiny_remainder_skips_candidate() {
        let filler = "y".repeat(800);
        let results = vec![
            result("a.txt", 0, &filler, 0.9),
            result("b.txt", 0, "Short tail. More words here.", 0.8),
        ];
        let packed = pack_context(&results, 1000);
        assert_eq!(packed.sources.len(), 1);
    }

    #[test]
    fn empty_results_pack_empty() {
        let packed = pack_context(&[], 4000);
        assert!(packed.is_empty());
        assert!(packed.sources.is_empty());
    }
}
