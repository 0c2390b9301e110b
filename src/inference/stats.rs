//! Serving statistics

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Rolling latency window plus request counters
#[derive(Debug)]
pub struct ServiceStats {
    window_size: usize,
    latencies_ms: RwLock<VecDeque<f64>>,

    total_requests: AtomicU64,
    total_predictions: AtomicU64,
    validation_errors: AtomicU64,
    internal_errors: AtomicU64,
    reloads: AtomicU64,

    start_time: Instant,
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ServiceStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            latencies_ms: RwLock::new(VecDeque::with_capacity(window_size.min(10_000))),
            total_requests: AtomicU64::new(0),
            total_predictions: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            internal_errors: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a served request of `n` records
    pub fn record_success(&self, n: usize, latency_ms: f64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_predictions.fetch_add(n as u64, Ordering::Relaxed);

        let mut window = self.latencies_ms.write();
        window.push_back(latency_ms);
        if window.len() > self.window_size {
            window.pop_front();
        }
    }

    pub fn record_validation_error(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> ServiceStatsSummary {
        let mut latencies: Vec<f64> = self.latencies_ms.read().iter().copied().collect();
        latencies.sort_by(|a, b| a.total_cmp(b));
        let avg = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        ServiceStatsSummary {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_predictions: self.total_predictions.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            avg_latency_ms: avg,
            p50_latency_ms: percentile(&latencies, 0.50),
            p95_latency_ms: percentile(&latencies, 0.95),
            p99_latency_ms: percentile(&latencies, 0.99),
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

/// Nearest-rank percentile of sorted values
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Snapshot of [`ServiceStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatsSummary {
    pub total_requests: u64,
    pub total_predictions: u64,
    pub validation_errors: u64,
    pub internal_errors: u64,
    pub reloads: u64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub uptime_secs: f64,
}
