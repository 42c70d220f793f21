//! Upload progress tracking.
//!
//! One [`UploadProgress`] record exists per in-flight or recently finished
//! ingestion. Records live in a concurrent map and are returned to clients
//! as copies; terminal records stay until a cleanup cycle sweeps them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::document::DocumentStatus;

/// Cooperative cancellation flag shared between the tracker and the
/// processing task, which checks it between pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Progress of a single ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct UploadProgress {
    pub document_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub status: DocumentStatus,
    /// Percentage in [0, 100].
    pub progress: f32,
    /// Human-readable name of the current pipeline step.
    pub current_step: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub estimated_time_remaining_ms: Option<u64>,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, String>,
    #[serde(skip)]
    pub(crate) cancel: CancelFlag,
}

/// Concurrent registry of upload progress records.
#[derive(Default)]
pub struct ProgressTracker {
    uploads: DashMap<String, UploadProgress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new upload and return its cancellation flag.
    pub fn create(
        &self,
        document_id: &str,
        file_name: &str,
        file_size: u64,
        metadata: HashMap<String, String>,
    ) -> CancelFlag {
        let cancel = CancelFlag::default();
        let now = Utc::now();
        self.uploads.insert(
            document_id.to_string(),
            UploadProgress {
                document_id: document_id.to_string(),
                file_name: file_name.to_string(),
                file_size,
                status: DocumentStatus::Pending,
                progress: 0.0,
                current_step: DocumentStatus::Pending.to_string(),
                started_at: now,
                updated_at: now,
                estimated_time_remaining_ms: None,
                error_message: None,
                metadata,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Advance an upload to `status`, updating percentage and the remaining
    /// time estimate extrapolated from elapsed time.
    pub fn advance(&self, document_id: &str, status: DocumentStatus) {
        if let Some(mut entry) = self.uploads.get_mut(document_id) {
            let progress = status.progress_percent();
            entry.status = status;
            entry.current_step = status.to_string();
            entry.progress = progress;
            entry.updated_at = Utc::now();
            entry.estimated_time_remaining_ms = if progress > 0.0 && progress < 100.0 {
                let elapsed = (entry.updated_at - entry.started_at).num_milliseconds().max(0);
                Some(((elapsed as f32 / progress) * (100.0 - progress)) as u64)
            } else {
                Some(0)
            };
        }
    }

    /// Mark an upload failed with the proximate cause.
    pub fn fail(&self, document_id: &str, error: impl Into<String>) {
        if let Some(mut entry) = self.uploads.get_mut(document_id) {
            entry.status = DocumentStatus::Failed;
            entry.current_step = DocumentStatus::Failed.to_string();
            entry.progress = 100.0;
            entry.error_message = Some(error.into());
            entry.updated_at = Utc::now();
            entry.estimated_time_remaining_ms = Some(0);
        }
    }

    /// Mark an upload cancelled. Records already in a terminal state are
    /// left alone.
    pub fn mark_cancelled(&self, document_id: &str) {
        if let Some(mut entry) = self.uploads.get_mut(document_id) {
            if entry.status.is_terminal() {
                return;
            }
            entry.status = DocumentStatus::Cancelled;
            entry.current_step = DocumentStatus::Cancelled.to_string();
            entry.progress = 100.0;
            entry.updated_at = Utc::now();
            entry.estimated_time_remaining_ms = Some(0);
        }
    }

    /// Request cooperative cancellation. Returns false for unknown ids.
    pub fn cancel(&self, document_id: &str) -> bool {
        match self.uploads.get(document_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Copy-on-read lookup.
    pub fn get(&self, document_id: &str) -> Option<UploadProgress> {
        self.uploads.get(document_id).map(|entry| entry.clone())
    }

    /// Remove a single record.
    pub fn remove(&self, document_id: &str) -> bool {
        self.uploads.remove(document_id).is_some()
    }

    /// Sweep terminal records older than `older_than_days` (0 sweeps every
    /// terminal record), optionally restricted to failures. Returns the ids
    /// that were (or would be) removed; with `dry_run` nothing changes.
    pub fn sweep(
        &self,
        older_than_days: u64,
        failed_only: bool,
        dry_run: bool,
    ) -> Vec<String> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days as i64);
        let candidates: Vec<String> = self
            .uploads
            .iter()
            .filter(|entry| {
                entry.status.is_terminal()
                    && entry.updated_at <= cutoff
                    && (!failed_only || entry.status == DocumentStatus::Failed)
            })
            .map(|entry| entry.document_id.clone())
            .collect();
        if !dry_run {
            for id in &candidates {
                self.uploads.remove(id);
            }
        }
        candidates
    }

    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_updates_percentage_and_estimate() {
        let tracker = ProgressTracker::new();
        tracker.create("doc-1", "a.txt", 100, HashMap::new());
        tracker.advance("doc-1", DocumentStatus::Chunking);

        let progress = tracker.get("doc-1").unwrap();
        assert_eq!(progress.status, DocumentStatus::Chunking);
        assert_eq!(progress.progress, 60.0);
        assert!(progress.estimated_time_remaining_ms.is_some());
    }

    #[test]
    fn fail_records_the_cause() {
        let tracker = ProgressTracker::new();
        tracker.create("doc-1", "a.txt", 100, HashMap::new());
        tracker.fail("doc-1", "chunk count 1250 exceeds limit 1000");

        let progress = tracker.get("doc-1").unwrap();
        assert_eq!(progress.status, DocumentStatus::Failed);
        assert!(progress.error_message.as_deref().unwrap().contains("1250"));
    }

    #[test]
    fn cancel_sets_the_shared_flag() {
        let tracker = ProgressTracker::new();
        let flag = tracker.create("doc-1", "a.txt", 100, HashMap::new());
        assert!(!flag.is_cancelled());
        assert!(tracker.cancel("doc-1"));
        assert!(flag.is_cancelled());
        assert!(!tracker.cancel("missing"));
    }

    #[test]
    fn sweep_respects_terminal_state_and_dry_run() {
        let tracker = ProgressTracker::new();
        tracker.create("done", "a.txt", 1, HashMap::new());
        tracker.advance("done", DocumentStatus::Completed);
        tracker.create("failed", "b.txt", 1, HashMap::new());
        tracker.fail("failed", "boom");
        tracker.create("running", "c.txt", 1, HashMap::new());
        tracker.advance("running", DocumentStatus::Embedding);

        let dry = tracker.sweep(0, false, true);
        assert_eq!(dry.len(), 2);
        assert_eq!(tracker.len(), 3, "dry run must not remove records");

        let failed_only = tracker.sweep(0, true, false);
        assert_eq!(failed_only, vec!["failed".to_string()]);
        assert_eq!(tracker.len(), 2);

        let rest = tracker.sweep(0, false, false);
        assert_eq!(rest, vec!["done".to_string()]);
        assert!(tracker.get("running").is_some());
    }
}
