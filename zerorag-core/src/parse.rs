//! Per-format document parsers and content analysis.
//!
//! Uploads are decoded to text with BOM-aware encoding detection (invalid
//! sequences are replaced, never fatal), then flattened into plain text in a
//! shape that keeps structure visible to semantic search: CSV rows become
//! `col=val` pairs, markdown tables are serialized row-wise with their
//! headers, lists become bullets.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::chunking::split_sentences;
use crate::document::ContentKind;
use crate::error::{Result, ZeroRagError};

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text,
    Csv,
    Markdown,
}

impl FileFormat {
    /// Resolve a format from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" => Some(Self::Text),
            "csv" => Some(Self::Csv),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// The outcome of decoding and flattening an upload.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Flattened plain text, ready for normalization and chunking.
    pub text: String,
    /// Name of the encoding the bytes were decoded with.
    pub encoding: &'static str,
    /// Format-specific metadata tags (CSV column types and the like).
    pub extra: HashMap<String, String>,
}

/// Decode raw bytes to text. UTF-16 is recognized by its BOM; everything
/// else is treated as UTF-8 with replacement on invalid sequences.
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    if bytes.len() >= 2 && (bytes[..2] == [0xFF, 0xFE] || bytes[..2] == [0xFE, 0xFF]) {
        let little_endian = bytes[0] == 0xFF;
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| {
                if little_endian {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        let decoded = String::from_utf16_lossy(&units);
        return (decoded, if little_endian { "utf-16le" } else { "utf-16be" });
    }
    let without_bom = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    (String::from_utf8_lossy(without_bom).into_owned(), "utf-8")
}

/// Parse an upload into flattened text according to its format.
///
/// # Errors
///
/// Returns [`ZeroRagError::Validation`] for empty input.
pub fn parse_bytes(format: FileFormat, bytes: &[u8]) -> Result<ParsedDocument> {
    if bytes.is_empty() {
        return Err(ZeroRagError::Validation("file is empty".into()));
    }
    let (content, encoding) = decode_text(bytes);
    match format {
        FileFormat::Text => {
            Ok(ParsedDocument { text: content, encoding, extra: HashMap::new() })
        }
        FileFormat::Csv => {
            let (text, extra) = flatten_csv(&content);
            Ok(ParsedDocument { text, encoding, extra })
        }
        FileFormat::Markdown => Ok(ParsedDocument {
            text: flatten_markdown(&content),
            encoding,
            extra: HashMap::new(),
        }),
    }
}

// ── CSV ────────────────────────────────────────────────────────────

/// Split a single CSV line, honoring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Detected type of a CSV column, derived from sample values.
fn detect_column_type(values: &[&str]) -> &'static str {
    let non_empty: Vec<&str> = values.iter().copied().filter(|v| !v.is_empty()).collect();
    if non_empty.is_empty() {
        return "string";
    }
    let date_re = date_regex();
    let total = non_empty.len();
    let integers = non_empty.iter().filter(|v| v.parse::<i64>().is_ok()).count();
    let floats = non_empty.iter().filter(|v| v.parse::<f64>().is_ok()).count();
    let dates = non_empty.iter().filter(|v| date_re.is_match(v)).count();
    if dates * 2 > total {
        "date"
    } else if integers * 2 > total {
        "integer"
    } else if floats * 2 > total {
        "float"
    } else {
        "string"
    }
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4}|\d{2}-\d{2}-\d{4})$").unwrap()
    })
}

/// Flatten CSV into `col=val` rows, preserving the header for search context.
/// Column types are detected from the first ten data rows and returned as
/// metadata only.
fn flatten_csv(content: &str) -> (String, HashMap<String, String>) {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return (String::new(), HashMap::new());
    };
    let header = split_csv_line(header_line);
    let rows: Vec<Vec<String>> = lines.map(split_csv_line).collect();

    let mut column_types = Vec::with_capacity(header.len());
    for (idx, name) in header.iter().enumerate() {
        let samples: Vec<&str> = rows
            .iter()
            .take(10)
            .filter_map(|row| row.get(idx).map(String::as_str))
            .collect();
        column_types.push(format!("{name}={}", detect_column_type(&samples)));
    }

    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(format!("Columns: {}", header.join(", ")));
    for row in &rows {
        let pairs: Vec<String> = header
            .iter()
            .zip(row.iter())
            .map(|(name, value)| {
                if value.is_empty() {
                    format!("{name}=(empty)")
                } else {
                    format!("{name}={value}")
                }
            })
            .collect();
        out.push(pairs.join("; "));
    }

    let mut extra = HashMap::new();
    extra.insert("csv_columns".to_string(), header.join(","));
    extra.insert("csv_column_types".to_string(), column_types.join(","));
    extra.insert("csv_rows".to_string(), rows.len().to_string());
    (out.join("\n"), extra)
}

// ── Markdown ───────────────────────────────────────────────────────

struct MarkdownPatterns {
    fence: Regex,
    inline_code: Regex,
    header: Regex,
    bold: Regex,
    italic: Regex,
    image: Regex,
    link: Regex,
    bullet: Regex,
    blockquote: Regex,
    rule: Regex,
}

fn markdown_patterns() -> &'static MarkdownPatterns {
    static PATTERNS: OnceLock<MarkdownPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| MarkdownPatterns {
        fence: Regex::new(r"(?s)```[a-zA-Z0-9_-]*\n(.*?)\n?```").unwrap(),
        inline_code: Regex::new(r"`([^`]+)`").unwrap(),
        header: Regex::new(r"(?m)^#{1,6}\s+(.+)$").unwrap(),
        bold: Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__").unwrap(),
        italic: Regex::new(r"\*([^*\n]+)\*|_([^_\n]+)_").unwrap(),
        image: Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap(),
        link: Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap(),
        bullet: Regex::new(r"(?m)^\s*[-*+]\s+(.+)$").unwrap(),
        blockquote: Regex::new(r"(?m)^>\s?(.+)$").unwrap(),
        rule: Regex::new(r"(?m)^[-*_]{3,}\s*$").unwrap(),
    })
}

/// Serialize a markdown table block row-wise, repeating the header on each
/// row. Returns `None` if the block does not look like a table.
fn flatten_table_block(block: &[&str]) -> Option<Vec<String>> {
    if block.len() < 2 {
        return None;
    }
    let parse_row = |line: &str| -> Vec<String> {
        line.trim()
            .trim_matches('|')
            .split('|')
            .map(|cell| cell.trim().to_string())
            .collect()
    };
    let header = parse_row(block[0]);
    let separator_ok = block[1]
        .trim()
        .trim_matches('|')
        .split('|')
        .all(|cell| cell.trim().chars().all(|c| matches!(c, '-' | ':' | ' ')));
    if !separator_ok || header.is_empty() {
        return None;
    }
    let mut rows = Vec::new();
    for line in &block[2..] {
        let cells = parse_row(line);
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        let pairs: Vec<String> = header
            .iter()
            .zip(cells.iter())
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        rows.push(pairs.join(" | "));
    }
    Some(rows)
}

/// Flatten markdown to plain text: headers become `## Heading` lines, lists
/// become bullets, tables serialize row-wise with headers, links and images
/// keep their text, code keeps its content.
fn flatten_markdown(content: &str) -> String {
    let p = markdown_patterns();
    let content = p.fence.replace_all(content, "$1");
    let content = p.inline_code.replace_all(&content, "$1");
    let content = p.image.replace_all(&content, "[Image: $1]");
    let content = p.link.replace_all(&content, "$1 (URL: $2)");
    let content = p.bold.replace_all(&content, "$1$2");
    let content = p.italic.replace_all(&content, "$1$2");
    let content = p.header.replace_all(&content, "## $1");
    let content = p.blockquote.replace_all(&content, "Quote: $1");
    let content = p.rule.replace_all(&content, "");

    // Table blocks are contiguous runs of pipe-delimited lines.
    let lines: Vec<&str> = content.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let is_table_line = |l: &str| {
            let t = l.trim();
            t.starts_with('|') || (t.contains('|') && t.matches('|').count() >= 2)
        };
        if is_table_line(lines[i]) {
            let start = i;
            while i < lines.len() && is_table_line(lines[i]) {
                i += 1;
            }
            match flatten_table_block(&lines[start..i]) {
                Some(rows) => out.extend(rows),
                None => out.extend(lines[start..i].iter().map(|l| l.to_string())),
            }
        } else {
            out.push(lines[i].to_string());
            i += 1;
        }
    }
    let flattened = out.join("\n");

    // Bullets last, so table handling sees original markers.
    p.bullet.replace_all(&flattened, "\u{2022} $1").into_owned()
}

// ── Content analysis ───────────────────────────────────────────────

/// Derived statistics and feature flags for a parsed document.
#[derive(Debug, Clone)]
pub struct ContentAnalysis {
    pub sentence_count: usize,
    pub paragraph_count: usize,
    pub line_count: usize,
    pub content_type: ContentKind,
    pub has_tables: bool,
    pub has_images: bool,
    pub has_links: bool,
    pub language_detected: Option<String>,
}

/// Analyze flattened text for metadata counters and feature flags.
pub fn analyze_content(text: &str, format: FileFormat) -> ContentAnalysis {
    let line_count = text.lines().count();
    let paragraph_count = text.split("\n\n").filter(|p| !p.trim().is_empty()).count();
    let sentence_count = split_sentences(text).len();
    let has_tables = text.contains('|') && text.contains('\n');
    let lower = text.to_ascii_lowercase();
    let has_images = text.contains("![") || lower.contains("[image:");
    let has_links = lower.contains("http") || lower.contains("www.");

    let content_type = if format == FileFormat::Csv {
        ContentKind::Structured
    } else if has_tables && has_links {
        ContentKind::Mixed
    } else if has_tables {
        ContentKind::Structured
    } else {
        ContentKind::Text
    };

    // Coarse heuristic only: ASCII-dominant alphabetic text reads as English.
    let total_alpha = text.chars().filter(|c| c.is_alphabetic()).count();
    let ascii_alpha = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    let language_detected = if total_alpha == 0 {
        None
    } else if ascii_alpha * 10 > total_alpha * 9 {
        Some("en".to_string())
    } else {
        Some("unknown".to_string())
    };

    ContentAnalysis {
        sentence_count,
        paragraph_count,
        line_count,
        content_type,
        has_tables,
        has_images,
        has_links,
        language_detected,
    }
}
