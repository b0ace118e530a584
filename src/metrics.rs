//! Aggregate counters across all coordinator activity.
//!
//! Pull-based: callers take a [`MetricsSnapshot`] whenever they want to
//! report. The export format (Prometheus, JSON endpoint, …) lives
//! outside this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Lock-free metrics aggregation, shared via `Arc`.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    tasks_started: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_cancelled: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    records_saved: AtomicU64,
    documents_analyzed: AtomicU64,
    task_time_micros: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_task_start(&self) {
        self.tasks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_complete(&self, elapsed: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.task_time_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_task_failed(&self, elapsed: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.task_time_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_task_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_records_saved(&self, count: u64) {
        self.records_saved.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_document_analyzed(&self) {
        self.documents_analyzed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let started = self.tasks_started.load(Ordering::Relaxed);
        let completed = self.tasks_completed.load(Ordering::Relaxed);
        let failed = self.tasks_failed.load(Ordering::Relaxed);
        let finished = completed + failed;

        let avg_task_secs = if finished > 0 {
            self.task_time_micros.load(Ordering::Relaxed) as f64 / finished as f64 / 1_000_000.0
        } else {
            0.0
        };
        let success_rate = if finished > 0 {
            completed as f64 / finished as f64 * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            tasks_started: started,
            tasks_completed: completed,
            tasks_failed: failed,
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            records_saved: self.records_saved.load(Ordering::Relaxed),
            documents_analyzed: self.documents_analyzed.load(Ordering::Relaxed),
            avg_task_secs,
            success_rate,
        }
    }
}

/// Point-in-time view of the collector, serializable for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub records_saved: u64,
    pub documents_analyzed: u64,
    pub avg_task_secs: f64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_task_start();
        metrics.record_task_start();
        metrics.record_task_complete(Duration::from_secs(2));
        metrics.record_task_failed(Duration::from_secs(4));
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_records_saved(7);

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_started, 2);
        assert_eq!(snap.tasks_completed, 1);
        assert_eq!(snap.tasks_failed, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.records_saved, 7);
        assert!((snap.avg_task_secs - 3.0).abs() < 1e-6);
        assert!((snap.success_rate - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_snapshot_has_no_rates() {
        let snap = MetricsCollector::new().snapshot();
        assert_eq!(snap.avg_task_secs, 0.0);
        assert_eq!(snap.success_rate, 0.0);
    }
}
