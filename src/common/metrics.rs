//! Replication metrics
//!
//! The coordinator carries an explicit [`ReplicationMetrics`] handle instead
//! of a process-global profiler; every component that observes something gets
//! a clone of the same `Arc`. Counters are plain atomics behind domain-named
//! recorders, and send latency keeps a running mean and worst case rather
//! than a full distribution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Running aggregate of `send` round-trip times.
#[derive(Debug, Default)]
struct SendLatency {
    count: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl SendLatency {
    fn observe(&self, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn mean_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.total_micros.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
    }

    fn max_ms(&self) -> f64 {
        self.max_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Everything the coordinator observes about one node's replication traffic.
#[derive(Debug, Default)]
pub struct ReplicationMetrics {
    sent: AtomicU64,
    received: AtomicU64,
    routed: AtomicU64,
    dropped: AtomicU64,
    undone: AtomicU64,
    restored: AtomicU64,
    send_latency: SendLatency,
}

impl ReplicationMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A replication request fanned out from this node
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A replication request executed on this node
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A response routed to a sender inbox by the demultiplexer
    pub fn record_response_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    /// A response that could not be routed (sender gone, request closed)
    pub fn record_response_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// An `undo()` compensation issued after a quorum shortfall
    pub fn record_undo_compensation(&self) {
        self.undone.fetch_add(1, Ordering::Relaxed);
    }

    /// An undo-slot request re-executed at startup
    pub fn record_crash_restore(&self) {
        self.restored.fetch_add(1, Ordering::Relaxed);
    }

    /// End-to-end latency of one completed `send`
    pub fn observe_send_latency(&self, elapsed: Duration) {
        self.send_latency.observe(elapsed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn responses_routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub fn responses_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn undo_compensations(&self) -> u64 {
        self.undone.load(Ordering::Relaxed)
    }

    pub fn crash_restores(&self) -> u64 {
        self.restored.load(Ordering::Relaxed)
    }

    pub fn send_count(&self) -> u64 {
        self.send_latency.count()
    }

    pub fn mean_send_ms(&self) -> f64 {
        self.send_latency.mean_ms()
    }

    pub fn max_send_ms(&self) -> f64 {
        self.send_latency.max_ms()
    }

    /// One-line summary for logs and the demo binary
    pub fn summary(&self) -> String {
        format!(
            "sent={} received={} routed={} dropped={} undo={} restored={} avg_send_ms={:.1} max_send_ms={:.1}",
            self.sent(),
            self.received(),
            self.responses_routed(),
            self.responses_dropped(),
            self.undo_compensations(),
            self.crash_restores(),
            self.mean_send_ms(),
            self.max_send_ms(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = ReplicationMetrics::new();
        assert_eq!(metrics.sent(), 0);
        assert_eq!(metrics.undo_compensations(), 0);
        assert_eq!(metrics.send_count(), 0);
        assert_eq!(metrics.mean_send_ms(), 0.0);
    }

    #[test]
    fn test_recorders_increment() {
        let metrics = ReplicationMetrics::new();
        metrics.record_sent();
        metrics.record_sent();
        metrics.record_received();
        metrics.record_undo_compensation();

        assert_eq!(metrics.sent(), 2);
        assert_eq!(metrics.received(), 1);
        assert_eq!(metrics.undo_compensations(), 1);
    }

    #[test]
    fn test_latency_mean_and_max() {
        let metrics = ReplicationMetrics::new();
        metrics.observe_send_latency(Duration::from_millis(4));
        metrics.observe_send_latency(Duration::from_millis(8));

        assert_eq!(metrics.send_count(), 2);
        assert!((metrics.mean_send_ms() - 6.0).abs() < 0.01);
        assert!((metrics.max_send_ms() - 8.0).abs() < 0.01);
    }

    #[test]
    fn test_summary() {
        let metrics = ReplicationMetrics::new();
        metrics.record_sent();
        metrics.observe_send_latency(Duration::from_millis(10));

        let summary = metrics.summary();
        assert!(summary.contains("sent=1"));
        assert!(summary.contains("avg_send_ms=10.0"));
    }
}
