//! Metrics Port (Driven Port)
//!
//! Interface the services report through. The Prometheus adapter lives in
//! `infrastructure::metrics`; tests inject a recording fake.

use std::time::Duration;

/// Why a record was not handed to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Local queue stayed full after a flush and one retry.
    QueueFull,
    /// Producer was closed.
    ProducerClosed,
    /// Record could not be serialized.
    Serialization,
}

impl DropReason {
    /// Metric label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::ProducerClosed => "producer_closed",
            Self::Serialization => "serialization",
        }
    }
}

/// Port for pipeline metrics.
pub trait MetricsSink: Send + Sync {
    /// A record decoded successfully.
    fn message_received(&self, symbol: &str, msg_type: &str);

    /// The broker confirmed a delivery.
    fn message_produced(&self, symbol: &str, msg_type: &str);

    /// A record was dropped before reaching the broker.
    fn message_dropped(&self, reason: DropReason);

    /// A quality finding, labelled by its tag.
    fn quality_error(&self, tag: &str);

    /// Sequences skipped by a forward jump.
    fn sequence_gaps(&self, skipped: u64);

    /// Time spent handling one datagram.
    fn processing_duration(&self, elapsed: Duration);

    /// Producer timestamp to ingestion time, in seconds.
    fn end_to_end_latency(&self, seconds: f64);

    /// Deliveries waiting in the producer queue.
    fn broker_queue_depth(&self, depth: usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_labels() {
        assert_eq!(DropReason::QueueFull.as_str(), "queue_full");
        assert_eq!(DropReason::ProducerClosed.as_str(), "producer_closed");
        assert_eq!(DropReason::Serialization.as_str(), "serialization");
    }
}
