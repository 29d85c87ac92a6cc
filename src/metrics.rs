//! Pipeline counters for the health endpoint and logs.
//!
//! One instance is shared (via `Arc`) by the provider and the worker pool of a
//! dispatcher. There is no process-wide singleton.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    cache_hits: AtomicUsize,
    /// Includes reads that failed and were treated as misses
    cache_misses: AtomicUsize,
    api_requests: AtomicUsize,
    api_errors: AtomicUsize,

    jobs_completed: AtomicUsize,
    jobs_failed: AtomicUsize,
    jobs_retried: AtomicUsize,
    jobs_interrupted: AtomicUsize,

    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::Relaxed)
}

/// `part / whole` as a percentage, 0 when nothing was counted.
fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        bump(&self.cache_hits);
    }

    pub fn record_cache_miss(&self) {
        bump(&self.cache_misses);
    }

    pub fn record_api_request(&self) {
        bump(&self.api_requests);
    }

    pub fn record_api_error(&self) {
        bump(&self.api_errors);
    }

    pub fn record_completed(&self) {
        bump(&self.jobs_completed);
    }

    pub fn record_failed(&self) {
        bump(&self.jobs_failed);
    }

    pub fn record_retried(&self) {
        bump(&self.jobs_retried);
    }

    pub fn record_interrupted(&self) {
        bump(&self.jobs_interrupted);
    }

    /// Count a processing routine as running until the guard is dropped.
    pub fn track_in_flight(&self) -> InFlightGuard<'_> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        InFlightGuard { metrics: self }
    }

    pub fn cache_hits(&self) -> usize {
        read(&self.cache_hits)
    }

    pub fn api_requests(&self) -> usize {
        read(&self.api_requests)
    }

    pub fn api_errors(&self) -> usize {
        read(&self.api_errors)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of routines ever running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> MetricsReport {
        let cache_hits = read(&self.cache_hits);
        let cache_misses = read(&self.cache_misses);
        let api_requests = read(&self.api_requests);
        let api_errors = read(&self.api_errors);

        MetricsReport {
            cache_hits,
            cache_misses,
            cache_hit_rate: percent(cache_hits, cache_hits + cache_misses),
            api_requests,
            api_errors,
            api_error_rate: percent(api_errors, api_requests),
            jobs_completed: read(&self.jobs_completed),
            jobs_failed: read(&self.jobs_failed),
            jobs_retried: read(&self.jobs_retried),
            jobs_interrupted: read(&self.jobs_interrupted),
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
        }
    }
}

pub struct InFlightGuard<'a> {
    metrics: &'a PipelineMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time snapshot, served by `/health`. Rates are percentages.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub api_requests: usize,
    pub api_errors: usize,
    pub api_error_rate: f64,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    pub jobs_retried: usize,
    pub jobs_interrupted: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_metrics_report_zero_rates() {
        let report = PipelineMetrics::new().report();

        assert_eq!(report.cache_hit_rate, 0.0);
        assert_eq!(report.api_error_rate, 0.0);
        assert_eq!(report.peak_in_flight, 0);
    }

    #[test]
    fn test_rates() {
        let metrics = PipelineMetrics::new();
        for _ in 0..3 {
            metrics.record_cache_hit();
        }
        metrics.record_cache_miss();
        for _ in 0..4 {
            metrics.record_api_request();
        }
        metrics.record_api_error();

        let report = metrics.report();
        assert_eq!(report.cache_hit_rate, 75.0);
        assert_eq!(report.api_error_rate, 25.0);
        assert_eq!(report.api_requests, 4);
    }

    #[test]
    fn test_job_outcomes() {
        let metrics = PipelineMetrics::new();
        metrics.record_completed();
        metrics.record_completed();
        metrics.record_failed();
        metrics.record_retried();
        metrics.record_interrupted();

        let report = metrics.report();
        assert_eq!(
            (
                report.jobs_completed,
                report.jobs_failed,
                report.jobs_retried,
                report.jobs_interrupted
            ),
            (2, 1, 1, 1)
        );
    }

    #[test]
    fn test_in_flight_guard_keeps_peak() {
        let metrics = PipelineMetrics::new();

        let first = metrics.track_in_flight();
        {
            let _second = metrics.track_in_flight();
            let _third = metrics.track_in_flight();
            assert_eq!(metrics.in_flight(), 3);
        }
        assert_eq!(metrics.in_flight(), 1);
        drop(first);

        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.peak_in_flight(), 3);
    }
}
