//! Request counters for the JSON-RPC client.

use crate::rpc::circuit_breaker::CircuitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct RpcMetrics {
    requests: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    rejected: AtomicU64,
    latency_ns: AtomicU64,
}

impl RpcMetrics {
    pub(crate) fn record_success(&self, latency: Duration) {
        self.record_request(latency);
    }

    pub(crate) fn record_failure(&self, latency: Duration) {
        self.record_request(latency);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A request refused by the circuit breaker before reaching the wire.
    pub(crate) fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn record_request(&self, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, breaker_state: CircuitState) -> RpcMetricsSnapshot {
        let total_requests = self.requests.load(Ordering::Relaxed);
        let total_errors = self.errors.load(Ordering::Relaxed);
        let latency_ns = self.latency_ns.load(Ordering::Relaxed);

        let (average_latency_ms, error_rate) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                latency_ns as f64 / total_requests as f64 / 1_000_000.0,
                total_errors as f64 / total_requests as f64,
            )
        };

        RpcMetricsSnapshot {
            total_requests,
            total_errors,
            total_timeouts: self.timeouts.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            average_latency_ms,
            error_rate,
            breaker_state,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct RpcMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub total_rejected: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub breaker_state: CircuitState,
}
