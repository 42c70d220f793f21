//! Response validation: safety scan, context adherence, quality checks.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::rag::types::{ResponseFormat, ValidationStatus};

/// Harmful-content patterns scanned against generated answers.
const HARMFUL_PATTERNS: &[&str] = &[
    r"how to (harm|hurt|kill|injure)",
    r"illegal (activities|methods|procedures)",
    r"dangerous (chemicals|substances|methods)",
    r"bypass(ing)? (security|protection)",
];

/// Words ignored when measuring answer/context token overlap.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did",
    "will", "would", "could", "should", "may", "might", "can", "this", "that", "these",
    "those", "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
];

/// Generic phrasings that flag a low-effort answer when it is also short.
const GENERIC_PHRASES: &[&str] = &[
    "i don't know",
    "i cannot answer",
    "i don't have enough information",
    "no information available",
    "n/a",
];

/// Answers whose context overlap falls below this warn on adherence.
const ADHERENCE_FLOOR: f64 = 0.15;

fn harmful_regexes() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        HARMFUL_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("harmful pattern must compile"))
            .collect()
    })
}

fn content_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Outcome of validating a generated answer.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    /// 1.0 = no harmful pattern matched; floor of 0.5.
    pub safety_score: f32,
    /// Token-set overlap between answer and context, in [0, 1].
    pub context_overlap: f64,
    pub issues: Vec<String>,
}

/// Validates generated answers. Stateless; regexes compile once.
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate an answer against the packed context and the requested
    /// format. The aggregate status is the worst of the safety, adherence,
    /// and quality verdicts.
    pub fn validate(
        &self,
        answer: &str,
        context: &str,
        format: ResponseFormat,
        has_sources: bool,
    ) -> ValidationOutcome {
        let mut issues = Vec::new();
        let mut status = ValidationStatus::Valid;
        let mut safety_score: f32 = 1.0;

        // Safety: each matched pattern costs 0.1, floored at 0.5.
        let lowered = answer.to_lowercase();
        let matched = harmful_regexes().iter().filter(|re| re.is_match(&lowered)).count();
        if matched > 0 {
            safety_score = (1.0 - 0.1 * matched as f32).max(0.5);
            status = status.max(ValidationStatus::Warning);
            issues.push(format!("{matched} safety pattern(s) matched"));
        }

        // Context adherence, only meaningful when sources were packed.
        let context_overlap = if context.trim().is_empty() {
            1.0
        } else {
            let context_words = content_words(context);
            let answer_words = content_words(answer);
            if answer_words.is_empty() {
                0.0
            } else {
                let shared = answer_words.intersection(&context_words).count();
                shared as f64 / answer_words.len() as f64
            }
        };
        if has_sources && context_overlap < ADHERENCE_FLOOR {
            status = status.max(ValidationStatus::Warning);
            issues.push(format!(
                "low context adherence: {:.2} overlap",
                context_overlap
            ));
        }

        // Quality.
        let trimmed = answer.trim();
        if trimmed.chars().count() < 20 {
            status = status.max(ValidationStatus::Warning);
            issues.push("answer is very short".to_string());
        }
        if GENERIC_PHRASES.iter().any(|p| lowered.contains(p)) && trimmed.chars().count() < 100 {
            status = status.max(ValidationStatus::Warning);
            issues.push("answer appears generic".to_string());
        }
        if let Some(issue) = format_issue(trimmed, format) {
            status = status.max(ValidationStatus::Warning);
            issues.push(issue);
        }
        if trimmed.is_empty() {
            status = ValidationStatus::Error;
            issues.push("answer is empty".to_string());
        }

        ValidationOutcome { status, safety_score, context_overlap, issues }
    }
}

/// Structural expectations per response format; `None` means satisfied.
fn format_issue(answer: &str, format: ResponseFormat) -> Option<String> {
    match format {
        ResponseFormat::Text | ResponseFormat::Summary => None,
        ResponseFormat::BulletPoints => {
            let bullets = answer
                .lines()
                .filter(|l| {
                    let t = l.trim_start();
                    t.starts_with('-') || t.starts_with('*') || t.starts_with('\u{2022}')
                })
                .count();
            (bullets < 3).then(|| format!("expected >= 3 bullet points, found {bullets}"))
        }
        ResponseFormat::NumberedList => {
            let numbered = answer
                .lines()
                .filter(|l| {
                    let t = l.trim_start();
                    t.chars().next().is_some_and(|c| c.is_ascii_digit())
                        && (t.contains(". ") || t.contains(") "))
                })
                .count();
            (numbered < 3).then(|| format!("expected >= 3 numbered items, found {numbered}"))
        }
        ResponseFormat::Table => {
            let has_row = answer.lines().any(|l| l.trim().starts_with('|'));
            (!has_row).then(|| "expected a Markdown table row".to_string())
        }
        ResponseFormat::Json => serde_json::from_str::<serde_json::Value>(answer)
            .err()
            .map(|_| "expected valid JSON".to_string()),
    }
}
