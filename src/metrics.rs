//! Delivery metrics for monitoring and observability.
//!
//! Counters are plain atomics updated from worker threads and the host thread
//! alike; [`BridgeMetrics::snapshot`] produces a serializable [`BridgeStats`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Deliveries accepted into the queue
    pub delivered: u64,

    /// Deliveries handed to the host handler
    pub processed: u64,

    /// Request replies taken by their waiting worker
    pub replied: u64,

    /// Requests resolved as host unavailable (shutdown, dropped, re-entrant)
    pub host_unavailable: u64,

    /// Requests whose bounded wait expired
    pub timed_out: u64,

    /// Handler errors, panics and malformed replies
    pub handler_failures: u64,

    /// Deliveries dropped without reaching the host
    pub dropped: u64,

    /// Replies produced after the requester stopped waiting
    pub late_replies: u64,

    /// Deliveries currently queued
    pub pending: usize,

    /// Highest queue depth seen
    pub peak_pending: u64,

    /// Average handler time in microseconds
    pub avg_handler_time_us: f64,
}

/// Metrics collector for the bridge
pub struct BridgeMetrics {
    delivered: AtomicU64,
    processed: AtomicU64,
    replied: AtomicU64,
    host_unavailable: AtomicU64,
    timed_out: AtomicU64,
    handler_failures: AtomicU64,
    dropped: AtomicU64,
    late_replies: AtomicU64,
    peak_pending: AtomicU64,
    total_handler_time_us: AtomicU64,
    error_counts: parking_lot::Mutex<HashMap<String, u64>>,
}

impl BridgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            delivered: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            replied: AtomicU64::new(0),
            host_unavailable: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            late_replies: AtomicU64::new(0),
            peak_pending: AtomicU64::new(0),
            total_handler_time_us: AtomicU64::new(0),
            error_counts: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record an enqueued delivery and the queue depth after it
    pub fn record_delivered(&self, depth: usize) {
        self.delivered.fetch_add(1, Ordering::Relaxed);

        // Update peak depth (CAS loop)
        let depth = depth as u64;
        let mut current_peak = self.peak_pending.load(Ordering::Relaxed);
        while depth > current_peak {
            match self.peak_pending.compare_exchange_weak(
                current_peak,
                depth,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => current_peak = p,
            }
        }
    }

    /// Record a handler run
    pub fn record_processed(&self, elapsed: Duration, success: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_handler_time_us
            .fetch_add(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX), Ordering::Relaxed);
        if !success {
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a reply taken by its waiter
    pub fn record_replied(&self) {
        self.replied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request resolved as host unavailable
    pub fn record_host_unavailable(&self) {
        self.host_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an expired wait
    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivery that never reached the host
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reply nobody waited for
    pub fn record_late_reply(&self) {
        self.late_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    pub fn record_error(&self, error_code: &str) {
        let mut counts = self.error_counts.lock();
        *counts.entry(error_code.to_string()).or_insert(0) += 1;
    }

    /// Get error counts
    pub fn error_counts(&self) -> HashMap<String, u64> {
        self.error_counts.lock().clone()
    }

    /// Get average handler time in microseconds
    pub fn avg_handler_time_us(&self) -> f64 {
        let total = self.processed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.total_handler_time_us.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Snapshot the counters; `pending` is supplied by the queue owner
    pub fn snapshot(&self, pending: usize) -> BridgeStats {
        BridgeStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            host_unavailable: self.host_unavailable.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            late_replies: self.late_replies.load(Ordering::Relaxed),
            pending,
            peak_pending: self.peak_pending.load(Ordering::Relaxed),
            avg_handler_time_us: self.avg_handler_time_us(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.delivered.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.replied.store(0, Ordering::Relaxed);
        self.host_unavailable.store(0, Ordering::Relaxed);
        self.timed_out.store(0, Ordering::Relaxed);
        self.handler_failures.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.late_replies.store(0, Ordering::Relaxed);
        self.peak_pending.store(0, Ordering::Relaxed);
        self.total_handler_time_us.store(0, Ordering::Relaxed);
        self.error_counts.lock().clear();
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self, pending: usize) -> String {
        let stats = self.snapshot(pending);
        let mut output = String::new();

        output.push_str("# HELP upnp_bridge_deliveries_total Deliveries by outcome\n");
        output.push_str("# TYPE upnp_bridge_deliveries_total counter\n");
        for (outcome, value) in [
            ("delivered", stats.delivered),
            ("processed", stats.processed),
            ("replied", stats.replied),
            ("host_unavailable", stats.host_unavailable),
            ("timed_out", stats.timed_out),
            ("handler_failure", stats.handler_failures),
            ("dropped", stats.dropped),
            ("late_reply", stats.late_replies),
        ] {
            output.push_str(&format!(
                "upnp_bridge_deliveries_total{{outcome=\"{}\"}} {}\n",
                outcome, value
            ));
        }

        output.push_str("\n# HELP upnp_bridge_pending Deliveries waiting for the host\n");
        output.push_str("# TYPE upnp_bridge_pending gauge\n");
        output.push_str(&format!("upnp_bridge_pending {}\n", stats.pending));

        output.push_str("\n# HELP upnp_bridge_handler_time_us Average handler time\n");
        output.push_str("# TYPE upnp_bridge_handler_time_us gauge\n");
        output.push_str(&format!(
            "upnp_bridge_handler_time_us {:.2}\n",
            stats.avg_handler_time_us
        ));

        // Errors
        output.push_str("\n# HELP upnp_bridge_errors_total Error counts by code\n");
        output.push_str("# TYPE upnp_bridge_errors_total counter\n");
        for (code, count) in self.error_counts() {
            output.push_str(&format!(
                "upnp_bridge_errors_total{{code=\"{}\"}} {}\n",
                code, count
            ));
        }

        output
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = BridgeMetrics::new();
        metrics.record_delivered(1);
        metrics.record_delivered(3);
        metrics.record_delivered(2);
        metrics.record_processed(Duration::from_micros(100), true);
        metrics.record_processed(Duration::from_micros(300), false);
        metrics.record_replied();

        let stats = metrics.snapshot(2);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.handler_failures, 1);
        assert_eq!(stats.replied, 1);
        assert_eq!(stats.peak_pending, 3);
        assert_eq!(stats.pending, 2);
        assert!((stats.avg_handler_time_us - 200.0).abs() < 0.001);
    }

    #[test]
    fn test_error_counts() {
        let metrics = BridgeMetrics::new();
        metrics.record_error("HOST_UNAVAILABLE");
        metrics.record_error("HOST_UNAVAILABLE");
        metrics.record_error("RESOURCE_EXHAUSTED");

        let counts = metrics.error_counts();
        assert_eq!(counts.get("HOST_UNAVAILABLE"), Some(&2));
        assert_eq!(counts.get("RESOURCE_EXHAUSTED"), Some(&1));
    }

    #[test]
    fn test_reset() {
        let metrics = BridgeMetrics::new();
        metrics.record_delivered(5);
        metrics.record_error("X");
        metrics.reset();
        assert_eq!(metrics.snapshot(0), BridgeStats::default());
        assert!(metrics.error_counts().is_empty());
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = BridgeMetrics::new();
        metrics.record_delivered(1);
        metrics.record_error("HOST_UNAVAILABLE");

        let output = metrics.to_prometheus(1);
        assert!(output.contains("upnp_bridge_deliveries_total{outcome=\"delivered\"} 1"));
        assert!(output.contains("upnp_bridge_pending 1"));
        assert!(output.contains("upnp_bridge_errors_total{code=\"HOST_UNAVAILABLE\"} 1"));
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let json = serde_json::to_string(&BridgeStats::default()).unwrap();
        assert!(json.contains("hostUnavailable"));
        assert!(json.contains("avgHandlerTimeUs"));
    }
}
