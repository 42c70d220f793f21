//! Property tests for the sentence-aware chunker.

use proptest::prelude::*;
use zerorag_core::chunking::SentenceChunker;

fn arb_text() -> impl Strategy<Value = String> {
    // Mixed prose with sentence punctuation and the occasional long word.
    proptest::collection::vec(
        prop_oneof![
            Just("the quick brown fox ".to_string()),
            Just("jumps over the lazy dog. ".to_string()),
            Just("how now! ".to_string()),
            Just("really? ".to_string()),
            "[a-z]{1,30} ".prop_map(|s| s),
        ],
        0..200,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Spans cover the text without gaps: the first starts at 0, the last
    /// ends at the text length, starts strictly advance, and consecutive
    /// spans overlap by at most `chunk_overlap` characters.
    #[test]
    fn spans_tile_the_text(
        text in arb_text(),
        chunk_size in 50usize..400,
        overlap_ratio in 0usize..100,
    ) {
        let chunk_overlap = (chunk_size * overlap_ratio / 100).min(chunk_size - 1);
        let chunker = SentenceChunker::new(chunk_size, chunk_overlap).unwrap();
        let total = text.chars().count();
        let spans = chunker.split_spans(&text);

        if total == 0 {
            prop_assert!(spans.is_empty());
            return Ok(());
        }

        prop_assert_eq!(spans.first().unwrap().0, 0);
        prop_assert_eq!(spans.last().unwrap().1, total);
        for (start, end) in &spans {
            prop_assert!(end > start);
            prop_assert!(end - start <= chunk_size);
        }
        for window in spans.windows(2) {
            let (prev_start, prev_end) = window[0];
            let (next_start, _) = window[1];
            prop_assert!(next_start > prev_start, "starts must strictly advance");
            prop_assert!(next_start <= prev_end, "no gaps between spans");
            prop_assert!(
                prev_end - next_start <= chunk_overlap || next_start == prev_start + 1,
                "overlap bounded by chunk_overlap"
            );
        }
    }

    /// Chunk indexes are contiguous from zero and ids are unique.
    #[test]
    fn chunk_indexes_contiguous_and_ids_unique(
        text in arb_text(),
        chunk_size in 50usize..300,
    ) {
        let chunker = SentenceChunker::new(chunk_size, chunk_size / 5).unwrap();
        let chunks = chunker.chunk("doc-p", &text, &std::collections::HashMap::new());
        let mut seen = std::collections::HashSet::new();
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.chunk_index, i);
            prop_assert!(seen.insert(chunk.id.clone()), "duplicate chunk id");
            prop_assert!(chunk.start_char < chunk.end_char);
        }
    }
}
