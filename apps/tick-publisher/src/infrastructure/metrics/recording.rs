//! In-memory `MetricsSink` that keeps every observation for inspection.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::application::ports::{DropReason, MetricsSink};

#[derive(Debug, Default)]
struct Recorded {
    received: HashMap<(String, String), u64>,
    produced: HashMap<(String, String), u64>,
    dropped: HashMap<DropReason, u64>,
    quality_errors: HashMap<String, u64>,
    sequence_gaps: u64,
    processing: Vec<Duration>,
    latency: Vec<f64>,
    queue_depth: Option<usize>,
}

/// Recording metrics sink for tests and local diagnostics.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    inner: Mutex<Recorded>,
}

impl RecordingMetrics {
    /// Records received for a symbol and message type.
    #[must_use]
    pub fn received(&self, symbol: &str, msg_type: &str) -> u64 {
        let key = (symbol.to_string(), msg_type.to_string());
        self.inner.lock().received.get(&key).copied().unwrap_or(0)
    }

    /// Deliveries confirmed for a symbol and message type.
    #[must_use]
    pub fn produced(&self, symbol: &str, msg_type: &str) -> u64 {
        let key = (symbol.to_string(), msg_type.to_string());
        self.inner.lock().produced.get(&key).copied().unwrap_or(0)
    }

    /// Confirmed deliveries across all labels.
    #[must_use]
    pub fn total_produced(&self) -> u64 {
        self.inner.lock().produced.values().sum()
    }

    /// Records dropped for a reason.
    #[must_use]
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.inner.lock().dropped.get(&reason).copied().unwrap_or(0)
    }

    /// Findings recorded under a tag.
    #[must_use]
    pub fn quality_errors(&self, tag: &str) -> u64 {
        self.inner.lock().quality_errors.get(tag).copied().unwrap_or(0)
    }

    /// Findings across all tags.
    #[must_use]
    pub fn total_quality_errors(&self) -> u64 {
        self.inner.lock().quality_errors.values().sum()
    }

    /// Sum of skipped sequences.
    #[must_use]
    pub fn sequence_gaps(&self) -> u64 {
        self.inner.lock().sequence_gaps
    }

    /// Number of processing-duration samples.
    #[must_use]
    pub fn processing_samples(&self) -> usize {
        self.inner.lock().processing.len()
    }

    /// Latency samples in arrival order.
    #[must_use]
    pub fn latency_samples(&self) -> Vec<f64> {
        self.inner.lock().latency.clone()
    }

    /// Last reported queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> Option<usize> {
        self.inner.lock().queue_depth
    }
}

impl MetricsSink for RecordingMetrics {
    fn message_received(&self, symbol: &str, msg_type: &str) {
        *self
            .inner
            .lock()
            .received
            .entry((symbol.to_string(), msg_type.to_string()))
            .or_default() += 1;
    }

    fn message_produced(&self, symbol: &str, msg_type: &str) {
        *self
            .inner
            .lock()
            .produced
            .entry((symbol.to_string(), msg_type.to_string()))
            .or_default() += 1;
    }

    fn message_dropped(&self, reason: DropReason) {
        *self.inner.lock().dropped.entry(reason).or_default() += 1;
    }

    fn quality_error(&self, tag: &str) {
        *self
            .inner
            .lock()
            .quality_errors
            .entry(tag.to_string())
            .or_default() += 1;
    }

    fn sequence_gaps(&self, skipped: u64) {
        let mut inner = self.inner.lock();
        inner.sequence_gaps = inner.sequence_gaps.saturating_add(skipped);
    }

    fn processing_duration(&self, elapsed: Duration) {
        self.inner.lock().processing.push(elapsed);
    }

    fn end_to_end_latency(&self, seconds: f64) {
        self.inner.lock().latency.push(seconds);
    }

    fn broker_queue_depth(&self, depth: usize) {
        self.inner.lock().queue_depth = Some(depth);
    }
}
