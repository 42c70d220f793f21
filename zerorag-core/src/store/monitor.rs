//! Memory sampling and performance alerts.
//!
//! The monitor samples process RSS on a fixed cadence, keeps a bounded
//! history, and drives the store's tiered cleanup with a cooldown so a
//! memory spike does not trigger a cleanup storm. Ten strictly
//! non-decreasing samples climbing more than 200 MB read as a leak.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Alert severity levels, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A recorded performance alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    /// Alert category (`memory_usage`, `queue_full`, `backend_degraded`, ...).
    pub kind: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Metrics captured at alert time.
    pub metrics: serde_json::Value,
}

/// Retained alert history size.
const ALERT_HISTORY_CAPACITY: usize = 50;

/// Floor aggressive cleanup truncates the alert history to.
const ALERT_HISTORY_FLOOR: usize = 10;

/// Bounded, thread-safe alert log.
#[derive(Default)]
pub struct AlertLog {
    alerts: Mutex<VecDeque<PerformanceAlert>>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an alert, evicting the oldest past capacity.
    pub fn record(
        &self,
        kind: &str,
        severity: AlertSeverity,
        message: impl Into<String>,
        metrics: serde_json::Value,
    ) {
        let message = message.into();
        warn!(kind, ?severity, %message, "performance alert");
        let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        if alerts.len() >= ALERT_HISTORY_CAPACITY {
            alerts.pop_front();
        }
        alerts.push_back(PerformanceAlert {
            kind: kind.to_string(),
            severity,
            message,
            timestamp: Utc::now(),
            metrics,
        });
    }

    /// Most recent alerts, newest last, optionally filtered by severity.
    pub fn recent(&self, limit: usize, severity: Option<AlertSeverity>) -> Vec<PerformanceAlert> {
        let alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        let mut result: Vec<PerformanceAlert> = alerts
            .iter()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .rev()
            .take(limit)
            .cloned()
            .collect();
        result.reverse();
        result
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all but the newest few entries.
    pub fn truncate(&self) {
        let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        while alerts.len() > ALERT_HISTORY_FLOOR {
            alerts.pop_front();
        }
    }

    pub fn clear(&self) {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Current process resident set size in megabytes. Reads
/// `/proc/self/status` on Linux; reports 0 elsewhere, which disables
/// threshold-driven cleanup rather than guessing.
pub fn process_rss_mb() -> f64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: f64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0.0);
                    return kb / 1024.0;
                }
            }
        }
    }
    0.0
}

/// Cleanup intensity chosen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTier {
    Light,
    Standard,
    Aggressive,
}

/// Memory-pressure tracking state shared between the monitor task and ad-hoc
/// checks performed between batches.
pub struct MemoryWatch {
    threshold_mb: f64,
    critical_mb: f64,
    history: Mutex<VecDeque<(DateTime<Utc>, f64)>>,
    last_cleanup: Mutex<Option<Instant>>,
    cooldown: Duration,
}

/// Memory samples retained for trend analysis.
const MEMORY_HISTORY_CAPACITY: usize = 100;

/// Floor aggressive cleanup truncates the sample history to.
const MEMORY_HISTORY_FLOOR: usize = 10;

impl MemoryWatch {
    pub fn new(threshold_mb: u64, critical_mb: u64) -> Self {
        Self {
            threshold_mb: threshold_mb as f64,
            critical_mb: critical_mb as f64,
            history: Mutex::new(VecDeque::new()),
            last_cleanup: Mutex::new(None),
            cooldown: Duration::from_secs(60),
        }
    }

    /// Record a sample and decide whether a cleanup tier should run, honoring
    /// the cooldown between cleanups.
    pub fn observe(&self, rss_mb: f64) -> Option<(CleanupTier, AlertSeverity, String)> {
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() >= MEMORY_HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back((Utc::now(), rss_mb));
        }

        if let Some(leak) = self.leak_suspicion() {
            if self.try_start_cleanup() {
                return Some((
                    CleanupTier::Aggressive,
                    AlertSeverity::High,
                    format!("possible memory leak: +{leak:.1}MB over the last 10 samples"),
                ));
            }
        }

        let (tier, severity, message) = if rss_mb > self.critical_mb {
            (
                CleanupTier::Aggressive,
                AlertSeverity::Critical,
                format!("memory usage critical: {rss_mb:.1}MB"),
            )
        } else if rss_mb > self.threshold_mb {
            (
                CleanupTier::Standard,
                AlertSeverity::High,
                format!("memory usage high: {rss_mb:.1}MB"),
            )
        } else if rss_mb > self.threshold_mb * 0.8 {
            (
                CleanupTier::Light,
                AlertSeverity::Medium,
                format!("memory usage approaching threshold: {rss_mb:.1}MB"),
            )
        } else {
            return None;
        };

        if self.try_start_cleanup() {
            Some((tier, severity, message))
        } else {
            None
        }
    }

    /// Latest sampled RSS, if any sample exists.
    pub fn current_mb(&self) -> f64 {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .map(|(_, mb)| *mb)
            .unwrap_or_else(process_rss_mb)
    }

    /// Whether the latest sample exceeds the standard threshold.
    pub fn over_threshold(&self) -> bool {
        self.current_mb() > self.threshold_mb
    }

    /// Whether the latest sample exceeds the critical threshold.
    pub fn over_critical(&self) -> bool {
        self.current_mb() > self.critical_mb
    }

    /// Drop all but the newest samples.
    pub fn truncate_history(&self) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        while history.len() > MEMORY_HISTORY_FLOOR {
            history.pop_front();
        }
    }

    fn try_start_cleanup(&self) -> bool {
        let mut last = self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner());
        let due = last.map_or(true, |at| at.elapsed() >= self.cooldown);
        if due {
            *last = Some(Instant::now());
        }
        due
    }

    fn leak_suspicion(&self) -> Option<f64> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() < 10 {
            return None;
        }
        let recent: Vec<f64> = history.iter().rev().take(10).map(|(_, mb)| *mb).collect();
        // recent is newest-first; reverse for chronological order.
        let chronological: Vec<f64> = recent.into_iter().rev().collect();
        let monotonic = chronological.windows(2).all(|w| w[0] <= w[1]);
        let growth = chronological[chronological.len() - 1] - chronological[0];
        if monotonic && growth > 200.0 {
            Some(growth)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_log_is_bounded() {
        let log = AlertLog::new();
        for i in 0..60 {
            log.record(
                "memory_usage",
                AlertSeverity::Low,
                format!("alert {i}"),
                serde_json::json!({}),
            );
        }
        assert_eq!(log.len(), ALERT_HISTORY_CAPACITY);
        log.truncate();
        assert_eq!(log.len(), ALERT_HISTORY_FLOOR);
    }

    #[test]
    fn recent_filters_by_severity() {
        let log = AlertLog::new();
        log.record("a", AlertSeverity::Low, "low", serde_json::json!({}));
        log.record("b", AlertSeverity::Critical, "crit", serde_json::json!({}));
        let critical = log.recent(10, Some(AlertSeverity::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].message, "crit");
    }

    #[test]
    fn observe_escalates_with_usage() {
        let watch = MemoryWatch::new(100, 200);
        assert!(watch.observe(50.0).is_none());

        let watch = MemoryWatch::new(100, 200);
        let (tier, severity, _) = watch.observe(90.0).unwrap();
        assert_eq!(tier, CleanupTier::Light);
        assert_eq!(severity, AlertSeverity::Medium);

        let watch = MemoryWatch::new(100, 200);
        let (tier, severity, _) = watch.observe(150.0).unwrap();
        assert_eq!(tier, CleanupTier::Standard);
        assert_eq!(severity, AlertSeverity::High);

        let watch = MemoryWatch::new(100, 200);
        let (tier, severity, _) = watch.observe(250.0).unwrap();
        assert_eq!(tier, CleanupTier::Aggressive);
        assert_eq!(severity, AlertSeverity::Critical);
    }

    #[test]
    fn cooldown_suppresses_repeat_cleanup() {
        let watch = MemoryWatch::new(100, 200);
        assert!(watch.observe(150.0).is_some());
        assert!(watch.observe(150.0).is_none(), "second trigger inside cooldown");
    }

    #[test]
    fn monotonic_growth_reads_as_leak() {
        let watch = MemoryWatch::new(10_000, 20_000);
        for i in 0..9 {
            assert!(watch.observe(100.0 + (i as f64) * 30.0).is_none());
        }
        let result = watch.observe(100.0 + 9.0 * 30.0);
        let (tier, severity, message) = result.expect("leak should trigger cleanup");
        assert_eq!(tier, CleanupTier::Aggressive);
        assert_eq!(severity, AlertSeverity::High);
        assert!(message.contains("leak"));
    }
}
