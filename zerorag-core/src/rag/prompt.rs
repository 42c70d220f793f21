//! Prompt templates and query classification.
//!
//! [`PromptEngine::build`] is a pure function of its inputs: template chosen
//! by query type (or the fallback template when context is empty), a safety
//! block chosen by safety level, and a format block chosen by the requested
//! response format.

use crate::rag::types::{QueryType, ResponseFormat, SafetyLevel};

const BASE_TEMPLATE: &str = "You are ZeroRAG, an assistant that answers strictly from the \
provided documents. Be accurate, address the question directly, and say clearly when the \
context does not contain the answer.\n\nContext Information:\n{context}\n\nUser Question: \
{query}\n\nInstructions:\n- Use only information from the provided context\n- Cite specific \
sources where possible\n- If the context is insufficient, say so explicitly\n\nAnswer:";

const FACTUAL_TEMPLATE: &str = "You are ZeroRAG, a factual information assistant. Provide \
precise answers grounded in the documents below.\n\nContext Information:\n{context}\n\n\
Factual Question: {query}\n\nInstructions:\n- Quote exact numbers, dates, and names from the \
context\n- State explicitly when a fact is missing\n- Attribute each fact to its source \
document\n- Do not speculate beyond the provided facts\n\nAnswer:";

const ANALYTICAL_TEMPLATE: &str = "You are ZeroRAG, an analytical assistant. Analyze the \
information below and offer reasoned insights.\n\nContext Information:\n{context}\n\n\
Analytical Question: {query}\n\nInstructions:\n- Identify patterns, causes, and \
relationships in the context\n- Support every conclusion with specific evidence\n- \
Acknowledge gaps or limitations in the analysis\n\nAnswer:";

const COMPARATIVE_TEMPLATE: &str = "You are ZeroRAG, a comparative analysis assistant. \
Compare and contrast the information below.\n\nContext Information:\n{context}\n\n\
Comparative Question: {query}\n\nInstructions:\n- Separate similarities from differences \
clearly\n- Use concrete examples from the context\n- Stay objective; highlight the key \
distinctions\n\nAnswer:";

const SUMMARIZATION_TEMPLATE: &str = "You are ZeroRAG, a summarization assistant. Produce a \
concise, complete summary of the information below.\n\nContext Information:\n{context}\n\n\
Summarization Request: {query}\n\nInstructions:\n- Cover the main themes and conclusions\n- \
Keep the summary organized and brief\n- Preserve the most important details\n\nAnswer:";

const CREATIVE_TEMPLATE: &str = "You are ZeroRAG, a creative assistant. Use the information \
below as grounding for inventive, useful suggestions.\n\nContext Information:\n{context}\n\n\
Creative Request: {query}\n\nInstructions:\n- Stay relevant to the context while exploring \
options\n- Offer more than one approach where sensible\n- Explain the reasoning behind each \
suggestion\n\nAnswer:";

const FALLBACK_TEMPLATE: &str = "You are ZeroRAG, a helpful assistant. No relevant context \
was found in the available documents for this question.\n\nQuestion: {query}\n\n\
Instructions:\n- Answer from general knowledge, briefly\n- State clearly that no document \
context was available\n- Do not fabricate citations or document references\n- Suggest \
rephrasing or asking about indexed topics\n\nAnswer:";

const SAFETY_STANDARD: &str = "Safety Guidelines:\n- Avoid harmful, dangerous, or illegal \
content\n- Respect privacy and confidentiality\n- Keep a professional, unbiased tone";

const SAFETY_CONSERVATIVE: &str = "Safety Guidelines:\n- Strictly avoid any potentially \
harmful content\n- Add disclaimers to medical, legal, or financial topics\n- Prefer safety \
over completeness\n- Decline controversial framings";

const SAFETY_PERMISSIVE: &str = "Safety Guidelines:\n- A broad range of topics is \
acceptable\n- Nuanced, detailed discussion is welcome\n- Maintain baseline safety standards";

/// Prompt assembly for the RAG pipeline. Stateless and deterministic.
#[derive(Debug, Clone, Default)]
pub struct PromptEngine;

impl PromptEngine {
    pub fn new() -> Self {
        Self
    }

    /// Classify a query by keyword heuristics. An explicit `query_type` on
    /// the request overrides this.
    pub fn classify(&self, query: &str) -> QueryType {
        let lowered = query.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

        if has(&["what is", "when", "where", "who", "how many", "how much", "facts", "data"]) {
            QueryType::Factual
        } else if has(&[
            "analyze",
            "explain",
            "why",
            "how does",
            "what causes",
            "implications",
            "trends",
        ]) {
            QueryType::Analytical
        } else if has(&["compare", "difference", "similar", "versus", "vs", "contrast"]) {
            QueryType::Comparative
        } else if has(&["summarize", "summary", "overview", "brief", "key points"]) {
            QueryType::Summarization
        } else if has(&[
            "creative",
            "innovative",
            "ideas",
            "suggestions",
            "brainstorm",
            "imagine",
            "design",
        ]) {
            QueryType::Creative
        } else {
            QueryType::General
        }
    }

    fn template(query_type: QueryType) -> &'static str {
        match query_type {
            QueryType::General => BASE_TEMPLATE,
            QueryType::Factual => FACTUAL_TEMPLATE,
            QueryType::Analytical => ANALYTICAL_TEMPLATE,
            QueryType::Comparative => COMPARATIVE_TEMPLATE,
            QueryType::Summarization => SUMMARIZATION_TEMPLATE,
            QueryType::Creative => CREATIVE_TEMPLATE,
        }
    }

    fn safety_block(level: SafetyLevel) -> &'static str {
        match level {
            SafetyLevel::Standard => SAFETY_STANDARD,
            SafetyLevel::Conservative => SAFETY_CONSERVATIVE,
            SafetyLevel::Permissive => SAFETY_PERMISSIVE,
        }
    }

    fn format_block(format: ResponseFormat) -> &'static str {
        match format {
            ResponseFormat::Text => "Provide a natural, flowing text response.",
            ResponseFormat::BulletPoints => {
                "Respond as a Markdown bullet list with at least 3 items."
            }
            ResponseFormat::NumberedList => {
                "Respond as a numbered list with at least 3 items."
            }
            ResponseFormat::Table => {
                "Format the response as a Markdown table with a header row."
            }
            ResponseFormat::Json => "Respond with a single valid JSON object.",
            ResponseFormat::Summary => {
                "Provide a concise summary with the key points highlighted."
            }
        }
    }

    /// Assemble the final prompt. With empty context the fallback template
    /// is used regardless of query type.
    pub fn build(
        &self,
        query_type: QueryType,
        safety_level: SafetyLevel,
        response_format: ResponseFormat,
        context: &str,
        query: &str,
    ) -> String {
        let template = if context.trim().is_empty() {
            FALLBACK_TEMPLATE
        } else {
            Self::template(query_type)
        };
        let mut prompt = template
            .replace("{context}", context)
            .replace("{query}", query);
        prompt.push_str("\n\n");
        prompt.push_str(Self::safety_block(safety_level));
        prompt.push_str("\n\nResponse Format: ");
        prompt.push_str(Self::format_block(response_format));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_keyword_families() {
        let engine = PromptEngine::new();
        assert_eq!(engine.classify("What is the vacation policy?"), QueryType::Factual);
        assert_eq!(engine.classify("Explain why the latency grew"), QueryType::Analytical);
        assert_eq!(engine.classify("Compare plan A and plan B"), QueryType::Comparative);
        assert_eq!(engine.classify("Give me a summary of the report"), QueryType::Summarization);
        assert_eq!(engine.classify("Brainstorm ideas for onboarding"), QueryType::Creative);
        assert_eq!(engine.classify("hello there"), QueryType::General);
    }

    #[test]
    fn build_is_deterministic_and_substitutes() {
        let engine = PromptEngine::new();
        let a = engine.build(
            QueryType::Factual,
            SafetyLevel::Standard,
            ResponseFormat::BulletPoints,
            "Document 1: policies.txt",
            "what is the policy?",
        );
        let b = engine.build(
            QueryType::Factual,
            SafetyLevel::Standard,
            ResponseFormat::BulletPoints,
            "Document 1: policies.txt",
            "what is the policy?",
        );
        assert_eq!(a, b);
        assert!(a.contains("Document 1: policies.txt"));
        assert!(a.contains("what is the policy?"));
        assert!(a.contains("bullet list"));
        assert!(a.contains("Safety Guidelines:"));
        assert!(!a.contains("{context}"));
        assert!(!a.contains("{query}"));
    }

    #[test]
    fn empty_context_selects_fallback() {
        let engine = PromptEngine::new();
        let prompt = engine.build(
            QueryType::Factual,
            SafetyLevel::Standard,
            ResponseFormat::Text,
            "  ",
            "Hello",
        );
        assert!(prompt.contains("No relevant context was found"));
        assert!(!prompt.contains("Factual Question"));
    }

    #[test]
    fn safety_levels_differ() {
        let engine = PromptEngine::new();
        let conservative = engine.build(
            QueryType::General,
            SafetyLevel::Conservative,
            ResponseFormat::Text,
            "ctx",
            "q",
        );
        let permissive = engine.build(
            QueryType::General,
            SafetyLevel::Permissive,
            ResponseFormat::Text,
            "ctx",
            "q",
        );
        assert_ne!(conservative, permissive);
        assert!(conservative.contains("Strictly avoid"));
    }
}
