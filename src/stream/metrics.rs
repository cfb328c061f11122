//! Counters tracking gateway request outcomes and latency, exposed as snapshots.

use crate::stream::circuit_breaker::CircuitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct StreamMetrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_latency_ns: AtomicU64,
    total_timeouts: AtomicU64,
    records_received: AtomicU64,
}

impl StreamMetrics {
    pub(crate) fn record_success(&self, latency: Duration, records: usize) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
        self.records_received
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub(crate) fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn add_latency(&self, latency: Duration) {
        let nanos = latency.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, breaker_state: CircuitState) -> StreamMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let (average_latency_ms, error_rate) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                (total_latency_ns as f64 / total_requests as f64) / 1_000_000.0,
                total_errors as f64 / total_requests as f64,
            )
        };

        StreamMetricsSnapshot {
            total_requests,
            total_errors,
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            records_received: self.records_received.load(Ordering::Relaxed),
            average_latency_ms,
            error_rate,
            breaker_state,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct StreamMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub records_received: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub breaker_state: CircuitState,
}
