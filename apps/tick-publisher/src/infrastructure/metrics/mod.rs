//! Prometheus Metrics Module
//!
//! Prometheus-backed `MetricsSink`, plus the recorder installation used by
//! the binary.
//!
//! # Metrics
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `messages_received_total` | counter | `symbol`, `msgType` |
//! | `messages_produced_total` | counter | `symbol`, `msgType` |
//! | `messages_dropped_total` | counter | `reason` |
//! | `quality_errors_total` | counter | `errorType` |
//! | `sequence_gaps_total` | counter | |
//! | `processing_duration_seconds` | histogram | |
//! | `end_to_end_latency_seconds` | histogram | |
//! | `broker_queue_depth` | gauge | |
//!
//! Metrics are rendered at `/metrics` on the health server port.

mod recording;

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub use recording::RecordingMetrics;

use crate::application::ports::{DropReason, MetricsSink};

/// Metric names.
pub mod names {
    /// Decoded records.
    pub const MESSAGES_RECEIVED: &str = "messages_received_total";
    /// Broker-confirmed deliveries.
    pub const MESSAGES_PRODUCED: &str = "messages_produced_total";
    /// Records dropped before the broker.
    pub const MESSAGES_DROPPED: &str = "messages_dropped_total";
    /// Quality findings.
    pub const QUALITY_ERRORS: &str = "quality_errors_total";
    /// Skipped sequences.
    pub const SEQUENCE_GAPS: &str = "sequence_gaps_total";
    /// Per-datagram handling time.
    pub const PROCESSING_DURATION: &str = "processing_duration_seconds";
    /// Producer timestamp to ingestion.
    pub const END_TO_END_LATENCY: &str = "end_to_end_latency_seconds";
    /// Producer queue depth.
    pub const BROKER_QUEUE_DEPTH: &str = "broker_queue_depth";
}

const PROCESSING_BUCKETS: &[f64] = &[
    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
];
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Errors installing the Prometheus recorder.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Histogram buckets were rejected.
    #[error("metrics configuration error: {0}")]
    Configuration(String),

    /// Global recorder could not be installed.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Install the Prometheus recorder and describe every metric.
///
/// Later calls return the handle from the first successful call.
///
/// # Errors
///
/// Returns `MetricsError` if the buckets are invalid or another recorder is
/// already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::PROCESSING_DURATION.to_string()),
            PROCESSING_BUCKETS,
        )
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .set_buckets_for_metric(
            Matcher::Full(names::END_TO_END_LATENCY.to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!(
        names::MESSAGES_RECEIVED,
        "Records decoded from the transport"
    );
    describe_counter!(
        names::MESSAGES_PRODUCED,
        "Records confirmed by the broker"
    );
    describe_counter!(
        names::MESSAGES_DROPPED,
        "Records dropped before reaching the broker"
    );
    describe_counter!(names::QUALITY_ERRORS, "Quality findings by type");
    describe_counter!(names::SEQUENCE_GAPS, "Sequence numbers skipped");
    describe_histogram!(
        names::PROCESSING_DURATION,
        metrics::Unit::Seconds,
        "Time to handle one datagram"
    );
    describe_histogram!(
        names::END_TO_END_LATENCY,
        metrics::Unit::Seconds,
        "Producer timestamp to ingestion"
    );
    describe_gauge!(
        names::BROKER_QUEUE_DEPTH,
        "Deliveries waiting in the producer queue"
    );
}

// =============================================================================
// Prometheus Sink
// =============================================================================

/// `MetricsSink` that records through the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl MetricsSink for PrometheusMetrics {
    fn message_received(&self, symbol: &str, msg_type: &str) {
        counter!(
            names::MESSAGES_RECEIVED,
            "symbol" => symbol.to_string(),
            "msgType" => msg_type.to_string()
        )
        .increment(1);
    }

    fn message_produced(&self, symbol: &str, msg_type: &str) {
        counter!(
            names::MESSAGES_PRODUCED,
            "symbol" => symbol.to_string(),
            "msgType" => msg_type.to_string()
        )
        .increment(1);
    }

    fn message_dropped(&self, reason: DropReason) {
        counter!(names::MESSAGES_DROPPED, "reason" => reason.as_str()).increment(1);
    }

    fn quality_error(&self, tag: &str) {
        counter!(names::QUALITY_ERRORS, "errorType" => tag.to_string()).increment(1);
    }

    fn sequence_gaps(&self, skipped: u64) {
        counter!(names::SEQUENCE_GAPS).increment(skipped);
    }

    fn processing_duration(&self, elapsed: Duration) {
        histogram!(names::PROCESSING_DURATION).record(elapsed.as_secs_f64());
    }

    fn end_to_end_latency(&self, seconds: f64) {
        histogram!(names::END_TO_END_LATENCY).record(seconds);
    }

    #[allow(clippy::cast_precision_loss)]
    fn broker_queue_depth(&self, depth: usize) {
        gauge!(names::BROKER_QUEUE_DEPTH).set(depth as f64);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::*;

    #[test]
    fn sink_renders_through_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            let sink = PrometheusMetrics;
            sink.message_received("AAPL", "TRADE");
            sink.message_produced("AAPL", "TRADE");
            sink.message_dropped(DropReason::QueueFull);
            sink.quality_error("sequence_gap_2");
            sink.sequence_gaps(2);
            sink.broker_queue_depth(7);
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"messages_received_total{symbol="AAPL",msgType="TRADE"} 1"#));
        assert!(rendered.contains(r#"messages_produced_total{symbol="AAPL",msgType="TRADE"} 1"#));
        assert!(rendered.contains(r#"messages_dropped_total{reason="queue_full"} 1"#));
        assert!(rendered.contains(r#"quality_errors_total{errorType="sequence_gap_2"} 1"#));
        assert!(rendered.contains("sequence_gaps_total 2"));
        assert!(rendered.contains("broker_queue_depth 7"));
    }
}
