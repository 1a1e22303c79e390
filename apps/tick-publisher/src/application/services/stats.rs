//! Pipeline Statistics
//!
//! Lock-free counters written by the ingestion task and read by the health
//! endpoint.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Shared operational counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    decode_failures: AtomicU64,
    quality_findings: AtomicU64,
    published: AtomicU64,
    delivery_failures: AtomicU64,
    dropped: AtomicU64,
    running: AtomicBool,
    broker_connected: AtomicBool,
}

impl PipelineStats {
    /// Create zeroed stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a decoded record.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an undecodable datagram.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count quality findings.
    pub fn record_findings(&self, count: u64) {
        self.quality_findings.fetch_add(count, Ordering::Relaxed);
    }

    /// Count a broker-confirmed delivery.
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a delivery the broker failed to store.
    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a record dropped before reaching the broker.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the ingestion loop as running or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Mark the broker adapter as connected or not.
    pub fn set_broker_connected(&self, connected: bool) {
        self.broker_connected.store(connected, Ordering::Release);
    }

    /// Whether the ingestion loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the broker adapter is connected.
    #[must_use]
    pub fn is_broker_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Acquire)
    }

    /// Decoded records so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            quality_findings: self.quality_findings.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            running: self.is_running(),
            broker_connected: self.is_broker_connected(),
        }
    }
}

/// Serializable copy of `PipelineStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    /// Decoded records.
    pub received: u64,
    /// Undecodable datagrams.
    pub decode_failures: u64,
    /// Quality findings across all records.
    pub quality_findings: u64,
    /// Broker-confirmed deliveries.
    pub published: u64,
    /// Deliveries the broker failed to store.
    pub delivery_failures: u64,
    /// Records dropped before reaching the broker.
    pub dropped: u64,
    /// Ingestion loop is running.
    pub running: bool,
    /// Broker adapter is connected.
    pub broker_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = PipelineStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_decode_failure();
        stats.record_findings(3);
        stats.record_published();
        stats.record_dropped();
        stats.set_running(true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.quality_findings, 3);
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.dropped, 1);
        assert!(snapshot.running);
        assert!(!snapshot.broker_connected);
    }
}
