//! Per-task scraping progress: monotone counters plus derived metrics.
//!
//! Counters only move through the `record_*` methods, which keeps
//! `processed == saved + errors + skipped` true at every observation
//! point. Derived figures (percent complete, rate) are computed on
//! read by [`ScrapingProgress::snapshot`], never stored.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How many recent error messages are retained per task.
const ERROR_DETAIL_WINDOW: usize = 5;

/// Mutable progress record of a single running task.
#[derive(Debug, Clone)]
pub struct ScrapingProgress {
    total_found: u64,
    processed: u64,
    saved: u64,
    errors: u64,
    skipped: u64,
    current_page: u32,
    current_status: String,
    error_details: VecDeque<String>,
    current_step: u32,
    total_steps: u32,
    started_at: DateTime<Utc>,
}

impl ScrapingProgress {
    pub fn new(total_steps: u32) -> Self {
        Self {
            total_found: 0,
            processed: 0,
            saved: 0,
            errors: 0,
            skipped: 0,
            current_page: 1,
            current_status: String::new(),
            error_details: VecDeque::with_capacity(ERROR_DETAIL_WINDOW),
            current_step: 0,
            total_steps,
            started_at: Utc::now(),
        }
    }

    /// Register `count` newly discovered items.
    pub fn record_found(&mut self, count: u64) {
        self.total_found += count;
    }

    /// One item processed and persisted.
    pub fn record_saved(&mut self) {
        self.processed += 1;
        self.saved += 1;
    }

    /// One item processed but skipped (e.g. a duplicate).
    pub fn record_skipped(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }

    /// One item processed with an error. The message joins the bounded
    /// ring of recent errors.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.processed += 1;
        self.errors += 1;
        if self.error_details.len() == ERROR_DETAIL_WINDOW {
            self.error_details.pop_front();
        }
        self.error_details.push_back(message.into());
    }

    /// Advance to the next discrete step with a human-readable status.
    pub fn advance_step(&mut self, status: impl Into<String>) {
        self.current_step = (self.current_step + 1).min(self.total_steps);
        self.current_status = status.into();
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.current_status = status.into();
    }

    pub fn set_page(&mut self, page: u32) {
        self.current_page = page;
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Compute the derived view of this progress record.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default();
        let elapsed_secs = elapsed.as_secs_f64();

        let percent_complete = if self.total_found > 0 {
            self.processed as f64 / self.total_found as f64 * 100.0
        } else {
            0.0
        };
        let items_per_minute = if elapsed_secs > 0.0 {
            self.processed as f64 / elapsed_secs * 60.0
        } else {
            0.0
        };
        let success_rate = if self.processed > 0 {
            self.saved as f64 / self.processed as f64 * 100.0
        } else {
            0.0
        };
        let error_rate = if self.processed > 0 {
            self.errors as f64 / self.processed as f64 * 100.0
        } else {
            0.0
        };

        ProgressSnapshot {
            total_found: self.total_found,
            processed: self.processed,
            saved: self.saved,
            errors: self.errors,
            skipped: self.skipped,
            current_page: self.current_page,
            current_status: self.current_status.clone(),
            error_details: self.error_details.iter().cloned().collect(),
            current_step: self.current_step,
            total_steps: self.total_steps,
            percent_complete,
            elapsed_secs,
            items_per_minute,
            success_rate,
            error_rate,
        }
    }
}

/// Point-in-time view of a task's progress, with derived metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total_found: u64,
    pub processed: u64,
    pub saved: u64,
    pub errors: u64,
    pub skipped: u64,
    pub current_page: u32,
    pub current_status: String,
    pub error_details: Vec<String>,
    pub current_step: u32,
    pub total_steps: u32,
    pub percent_complete: f64,
    pub elapsed_secs: f64,
    pub items_per_minute: f64,
    pub success_rate: f64,
    pub error_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_stay_consistent() {
        let mut p = ScrapingProgress::new(3);
        p.record_found(10);
        p.record_saved();
        p.record_saved();
        p.record_skipped();
        p.record_error("boom");

        assert_eq!(p.processed(), 4);
        assert_eq!(p.saved() + p.errors() + p.skipped(), p.processed());
    }

    #[test]
    fn test_percent_complete() {
        let mut p = ScrapingProgress::new(2);
        assert_eq!(p.snapshot().percent_complete, 0.0);

        p.record_found(4);
        p.record_saved();
        p.record_saved();
        let snap = p.snapshot();
        assert!((snap.percent_complete - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_ring_is_bounded() {
        let mut p = ScrapingProgress::new(1);
        for i in 0..8 {
            p.record_error(format!("error {i}"));
        }
        let snap = p.snapshot();
        assert_eq!(snap.error_details.len(), ERROR_DETAIL_WINDOW);
        assert_eq!(snap.error_details[0], "error 3");
        assert_eq!(snap.error_details[4], "error 7");
        assert_eq!(snap.errors, 8);
    }

    #[test]
    fn test_step_advance_is_capped() {
        let mut p = ScrapingProgress::new(2);
        p.advance_step("scraping");
        p.advance_step("analysis");
        p.advance_step("extra");
        let snap = p.snapshot();
        assert_eq!(snap.current_step, 2);
        assert_eq!(snap.current_status, "extra");
    }

    #[test]
    fn test_rates() {
        let mut p = ScrapingProgress::new(1);
        p.record_saved();
        p.record_saved();
        p.record_saved();
        p.record_error("x");
        let snap = p.snapshot();
        assert!((snap.success_rate - 75.0).abs() < f64::EPSILON);
        assert!((snap.error_rate - 25.0).abs() < f64::EPSILON);
    }
}
