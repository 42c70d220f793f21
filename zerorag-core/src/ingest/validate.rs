//! Stateless upload validation.

use serde::Serialize;

use crate::config::DocumentConfig;

/// Extensions that are never accepted, even when nominally supported.
const SUSPICIOUS_EXTENSIONS: &[&str] =
    &["exe", "bat", "cmd", "com", "scr", "pif", "vbs", "js"];

/// Processing-rate baseline used for time estimates, in bytes per second.
const BASE_RATE_BYTES_PER_SEC: f64 = 1024.0 * 1024.0;

/// Estimates are capped here, in seconds.
const MAX_ESTIMATE_SECS: f64 = 300.0;

/// Outcome of validating an upload request before any processing.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub estimated_processing_time_secs: f64,
    pub supported_features: Vec<String>,
    pub file_extension: String,
}

/// Validates upload requests against configured limits and basic abuse
/// heuristics (double extensions, executable suffixes, declared type
/// mismatches). Pure; holds only configuration.
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
    supported_formats: Vec<String>,
}

impl FileValidator {
    pub fn new(config: &DocumentConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            supported_formats: config.supported_formats.clone(),
        }
    }

    /// Validate a prospective upload from its name, size, and declared
    /// content type.
    pub fn validate(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let extension = file_name
            .rsplit('.')
            .next()
            .filter(|ext| *ext != file_name)
            .unwrap_or("")
            .to_ascii_lowercase();

        if file_size > self.max_file_size {
            errors.push(format!(
                "file size {file_size} bytes exceeds maximum {} bytes",
                self.max_file_size
            ));
        }
        if file_size == 0 {
            errors.push("file is empty".to_string());
        }
        if extension.is_empty() || !self.supported_formats.contains(&extension) {
            errors.push(format!("unsupported file format: '{extension}'"));
        }
        if SUSPICIOUS_EXTENSIONS.contains(&extension.as_str()) {
            errors.push(format!("executable file type '{extension}' is not accepted"));
        }
        if file_name.matches('.').count() > 1 {
            errors.push("file names with multiple extensions are not accepted".to_string());
        }
        if let Some(declared) = content_type {
            if !content_type_matches(declared, &extension) {
                warnings.push(format!(
                    "declared content type '{declared}' does not match extension '{extension}'"
                ));
            }
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            estimated_processing_time_secs: estimate_processing_secs(file_size, &extension),
            supported_features: supported_features(&extension),
            file_extension: extension,
        }
    }
}

fn content_type_matches(content_type: &str, extension: &str) -> bool {
    let base = content_type.split(';').next().unwrap_or(content_type).trim();
    match base {
        "text/plain" => matches!(extension, "txt" | "md" | "csv"),
        "text/markdown" => matches!(extension, "md" | "markdown"),
        "text/csv" | "application/csv" => extension == "csv",
        "application/octet-stream" => true,
        other => other.starts_with("text/"),
    }
}

fn estimate_processing_secs(file_size: u64, extension: &str) -> f64 {
    let multiplier = match extension {
        "txt" => 1.0,
        "md" => 1.2,
        "csv" => 1.5,
        _ => 1.5,
    };
    ((file_size as f64 / BASE_RATE_BYTES_PER_SEC) * multiplier).min(MAX_ESTIMATE_SECS)
}

fn supported_features(extension: &str) -> Vec<String> {
    let mut features = vec![
        "text_extraction".to_string(),
        "chunking".to_string(),
        "embedding".to_string(),
    ];
    match extension {
        "md" => features.push("markdown_flattening".to_string()),
        "csv" => {
            features.push("table_parsing".to_string());
            features.push("column_type_detection".to_string());
        }
        _ => {}
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn validator() -> FileValidator {
        FileValidator::new(&AppConfig::default().document)
    }

    #[test]
    fn accepts_a_plain_text_upload() {
        let report = validator().validate("notes.txt", 5_000, Some("text/plain"));
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(report.file_extension, "txt");
    }

    #[test]
    fn size_boundary_is_inclusive() {
        let max = AppConfig::default().document.max_file_size;
        assert!(validator().validate("a.txt", max, None).is_valid);
        assert!(!validator().validate("a.txt", max + 1, None).is_valid);
    }

    #[test]
    fn rejects_double_extension_and_executables() {
        let report = validator().validate("invoice.pdf.exe", 100, None);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("multiple extensions")));

        let report = validator().validate("setup.exe", 100, None);
        assert!(report.errors.iter().any(|e| e.contains("unsupported")));
    }

    #[test]
    fn rejects_unsupported_format_and_empty_file() {
        assert!(!validator().validate("image.png", 100, None).is_valid);
        assert!(!validator().validate("notes.txt", 0, None).is_valid);
    }

    #[test]
    fn mismatched_content_type_warns_but_passes() {
        let report = validator().validate("data.csv", 100, Some("text/markdown"));
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn estimate_grows_with_size_and_is_capped() {
        let small = estimate_processing_secs(1024 * 1024, "txt");
        let large = estimate_processing_secs(10 * 1024 * 1024, "csv");
        assert!(small < large);
        assert!(estimate_processing_secs(u64::MAX / 2, "csv") <= MAX_ESTIMATE_SECS);
    }
}
