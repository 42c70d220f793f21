//! Performance instrumentation for the vector store.
//!
//! Counters are atomic; latency samples go into bounded ring buffers that
//! percentile snapshots read without blocking writers for long.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

/// Samples kept per operation for percentile computation.
const LATENCY_RING_CAPACITY: usize = 512;

/// Floor the ring is truncated to by aggressive cleanup.
pub(crate) const LATENCY_RING_FLOOR: usize = 64;

#[derive(Default)]
struct OperationRecord {
    count: AtomicU64,
    errors: AtomicU64,
    latencies_ms: Mutex<VecDeque<f64>>,
}

/// Latency percentiles for one operation.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub errors: u64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// A point-in-time view of store metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_operations: u64,
    pub failed_operations: u64,
    pub success_rate: f64,
    pub uptime_seconds: u64,
    pub operations: std::collections::BTreeMap<String, LatencySummary>,
}

/// Store-wide operation metrics.
pub struct OperationMetrics {
    started: Instant,
    total: AtomicU64,
    failed: AtomicU64,
    per_operation: DashMap<&'static str, OperationRecord>,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            per_operation: DashMap::new(),
        }
    }

    /// Record a completed operation with its wall-clock latency.
    pub fn record(&self, operation: &'static str, elapsed_ms: f64, ok: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let entry = self.per_operation.entry(operation).or_default();
        entry.count.fetch_add(1, Ordering::Relaxed);
        if !ok {
            entry.errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut ring = entry.latencies_ms.lock().unwrap_or_else(|e| e.into_inner());
        if ring.len() >= LATENCY_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(elapsed_ms);
    }

    /// Overall error rate in [0, 1].
    pub fn error_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.failed.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn total_operations(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failed_operations(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Truncate latency rings to the aggressive-cleanup floor.
    pub fn truncate_history(&self) {
        for entry in self.per_operation.iter() {
            let mut ring = entry.latencies_ms.lock().unwrap_or_else(|e| e.into_inner());
            while ring.len() > LATENCY_RING_FLOOR {
                ring.pop_front();
            }
        }
    }

    /// Snapshot counters and percentiles for the metrics endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut operations = std::collections::BTreeMap::new();
        for entry in self.per_operation.iter() {
            let ring = entry.latencies_ms.lock().unwrap_or_else(|e| e.into_inner());
            let mut sorted: Vec<f64> = ring.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let percentile = |p: f64| -> f64 {
                if sorted.is_empty() {
                    return 0.0;
                }
                let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
                sorted[idx.min(sorted.len() - 1)]
            };
            operations.insert(
                entry.key().to_string(),
                LatencySummary {
                    count: entry.count.load(Ordering::Relaxed),
                    errors: entry.errors.load(Ordering::Relaxed),
                    p50_ms: percentile(0.50),
                    p90_ms: percentile(0.90),
                    p95_ms: percentile(0.95),
                    p99_ms: percentile(0.99),
                    max_ms: sorted.last().copied().unwrap_or(0.0),
                },
            );
        }
        let total = self.total.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_operations: total,
            failed_operations: failed,
            success_rate: if total == 0 {
                1.0
            } else {
                (total - failed) as f64 / total as f64
            },
            uptime_seconds: self.started.elapsed().as_secs(),
            operations,
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_snapshots() {
        let metrics = OperationMetrics::new();
        metrics.record("search", 5.0, true);
        metrics.record("search", 15.0, true);
        metrics.record("upsert", 100.0, false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_operations, 3);
        assert_eq!(snapshot.failed_operations, 1);
        let search = snapshot.operations.get("search").unwrap();
        assert_eq!(search.count, 2);
        assert_eq!(search.errors, 0);
        assert!(search.p50_ms >= 5.0 && search.p99_ms <= 15.0);
    }

    #[test]
    fn ring_is_bounded() {
        let metrics = OperationMetrics::new();
        for i in 0..(LATENCY_RING_CAPACITY + 100) {
            metrics.record("search", i as f64, true);
        }
        let entry = metrics.per_operation.get("search").unwrap();
        assert_eq!(
            entry.latencies_ms.lock().unwrap().len(),
            LATENCY_RING_CAPACITY
        );
        drop(entry);

        metrics.truncate_history();
        let entry = metrics.per_operation.get("search").unwrap();
        assert_eq!(entry.latencies_ms.lock().unwrap().len(), LATENCY_RING_FLOOR);
    }
}
