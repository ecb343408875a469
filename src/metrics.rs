//! Per-process request counters and search latency.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Number of most recent search latencies kept for the percentiles.
pub const LATENCY_WINDOW: usize = 10_000;

/// Collects runtime metrics for one service process.
///
/// Counters cover the whole process lifetime; latency figures cover the
/// last [`LATENCY_WINDOW`] searches.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    search_latencies_us: VecDeque<f64>,
    total_searches: u64,
    total_adds: u64,
    total_removes: u64,
    total_imports: u64,
    total_restores: u64,
    total_failures: u64,
}

/// Point-in-time view served on `/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_searches: u64,
    pub total_adds: u64,
    pub total_removes: u64,
    pub total_imports: u64,
    pub total_restores: u64,
    pub total_failures: u64,
    pub avg_search_latency_us: f64,
    pub p50_search_latency_us: f64,
    pub p95_search_latency_us: f64,
    pub p99_search_latency_us: f64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a search (by id, key or embedding) with its duration.
    pub fn record_search(&mut self, duration: Duration) {
        self.total_searches += 1;
        if self.search_latencies_us.len() == LATENCY_WINDOW {
            self.search_latencies_us.pop_front();
        }
        self.search_latencies_us.push_back(duration.as_micros() as f64);
    }

    pub fn record_add(&mut self) {
        self.total_adds += 1;
    }

    pub fn record_remove(&mut self) {
        self.total_removes += 1;
    }

    pub fn record_import(&mut self) {
        self.total_imports += 1;
    }

    pub fn record_restore(&mut self) {
        self.total_restores += 1;
    }

    /// Record a call that returned an error.
    pub fn record_failure(&mut self) {
        self.total_failures += 1;
    }

    pub fn total_searches(&self) -> u64 {
        self.total_searches
    }

    pub fn total_adds(&self) -> u64 {
        self.total_adds
    }

    pub fn total_removes(&self) -> u64 {
        self.total_removes
    }

    /// Average search latency in microseconds.
    pub fn avg_search_latency_us(&self) -> f64 {
        if self.search_latencies_us.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.search_latencies_us.iter().sum();
        sum / self.search_latencies_us.len() as f64
    }

    /// Search latency percentile (e.g. 50.0, 95.0, 99.0) in microseconds.
    pub fn percentile_search_latency_us(&self, percentile: f64) -> f64 {
        if self.search_latencies_us.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f64> = self.search_latencies_us.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_searches: self.total_searches,
            total_adds: self.total_adds,
            total_removes: self.total_removes,
            total_imports: self.total_imports,
            total_restores: self.total_restores,
            total_failures: self.total_failures,
            avg_search_latency_us: self.avg_search_latency_us(),
            p50_search_latency_us: self.percentile_search_latency_us(50.0),
            p95_search_latency_us: self.percentile_search_latency_us(95.0),
            p99_search_latency_us: self.percentile_search_latency_us(99.0),
        }
    }
}
