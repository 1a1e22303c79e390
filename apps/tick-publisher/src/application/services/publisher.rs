//! Publisher Service
//!
//! Serializes records and hands them to the broker's local queue, draining
//! delivery reports as it goes.
//!
//! # Backpressure
//!
//! When the broker reports its queue full, the publisher flushes (waiting up
//! to the flush timeout for outstanding deliveries), then resubmits the same
//! delivery exactly once. A second rejection drops the record and counts it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::stats::PipelineStats;
use crate::application::ports::{
    BrokerClient, BrokerError, Delivery, DeliveryReport, DropReason, MetricsSink, ProduceError,
};
use crate::domain::record::MarketRecord;

/// Default time to wait for outstanding deliveries on flush.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Publisher settings.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Destination topic for every record.
    pub topic: String,
    /// Flush timeout for backpressure and shutdown.
    pub flush_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: "market.ticks".to_string(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// Result of a single `publish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted on the first attempt.
    Enqueued,
    /// Accepted on the retry after a flush.
    EnqueuedAfterFlush,
    /// Rejected twice and dropped.
    Dropped,
}

/// Errors from publishing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Record could not be serialized.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Producer no longer accepts deliveries.
    #[error("producer is closed")]
    Closed,

    /// Broker failed while flushing.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Backpressure-aware publisher for one topic.
pub struct Publisher<B: BrokerClient> {
    broker: B,
    reports: mpsc::UnboundedReceiver<DeliveryReport>,
    config: PublisherConfig,
    metrics: Arc<dyn MetricsSink>,
    stats: Arc<PipelineStats>,
}

impl<B: BrokerClient> Publisher<B> {
    /// Create a publisher over a broker and its delivery report channel.
    #[must_use]
    pub fn new(
        broker: B,
        reports: mpsc::UnboundedReceiver<DeliveryReport>,
        config: PublisherConfig,
        metrics: Arc<dyn MetricsSink>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            broker,
            reports,
            config,
            metrics,
            stats,
        }
    }

    /// Underlying broker client.
    #[must_use]
    pub const fn broker(&self) -> &B {
        &self.broker
    }

    /// Topic records are published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Serialize and enqueue a record.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Serialize` if the record cannot be encoded and
    /// `PublishError::Closed` if the producer has shut down. Queue overflow is
    /// not an error; see `PublishOutcome::Dropped`.
    pub async fn publish(&mut self, record: &MarketRecord) -> Result<PublishOutcome, PublishError> {
        let payload = match record.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.drop_record(DropReason::Serialization);
                return Err(e.into());
            }
        };

        let delivery = Delivery {
            topic: self.config.topic.clone(),
            payload,
            symbol: record.symbol_label().into_owned(),
            msg_type: record.msg_type().to_string(),
        };

        let outcome = match self.broker.produce(delivery) {
            Ok(_) => PublishOutcome::Enqueued,
            Err(ProduceError::QueueFull(rejected)) => self.flush_and_retry(rejected).await?,
            Err(ProduceError::Closed) => {
                self.drop_record(DropReason::ProducerClosed);
                return Err(PublishError::Closed);
            }
        };

        self.poll();
        self.metrics.broker_queue_depth(self.broker.in_flight());
        Ok(outcome)
    }

    async fn flush_and_retry(&mut self, delivery: Delivery) -> Result<PublishOutcome, PublishError> {
        tracing::warn!(
            in_flight = self.broker.in_flight(),
            symbol = %delivery.symbol,
            "Producer queue full, flushing before retry"
        );

        if let Err(e) = self.broker.flush(self.config.flush_timeout).await {
            tracing::warn!(error = %e, "Flush before retry did not complete");
        }
        self.poll();

        match self.broker.produce(delivery) {
            Ok(_) => Ok(PublishOutcome::EnqueuedAfterFlush),
            Err(ProduceError::QueueFull(lost)) => {
                tracing::error!(
                    symbol = %lost.symbol,
                    msg_type = %lost.msg_type,
                    topic = %lost.topic,
                    "Producer queue still full after flush, dropping record"
                );
                self.drop_record(DropReason::QueueFull);
                Ok(PublishOutcome::Dropped)
            }
            Err(ProduceError::Closed) => {
                self.drop_record(DropReason::ProducerClosed);
                Err(PublishError::Closed)
            }
        }
    }

    /// Drain every delivery report available right now.
    ///
    /// Returns the number of reports handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(report) = self.reports.try_recv() {
            self.on_delivery(report);
            handled += 1;
        }
        handled
    }

    fn on_delivery(&self, report: DeliveryReport) {
        match report.result {
            Ok(metadata) => {
                self.metrics.message_produced(&report.symbol, &report.msg_type);
                self.stats.record_published();
                tracing::trace!(
                    handle = report.handle.0,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    "Delivery confirmed"
                );
            }
            Err(e) => {
                self.stats.record_delivery_failure();
                tracing::error!(
                    handle = report.handle.0,
                    topic = %report.topic,
                    symbol = %report.symbol,
                    error = %e,
                    "Delivery failed"
                );
            }
        }
    }

    fn drop_record(&self, reason: DropReason) {
        self.metrics.message_dropped(reason);
        self.stats.record_dropped();
    }

    /// Flush outstanding deliveries and drain the final reports.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Broker` if the flush times out or fails. Reports
    /// that did arrive are still drained.
    pub async fn shutdown(&mut self) -> Result<(), PublishError> {
        tracing::info!(
            in_flight = self.broker.in_flight(),
            timeout_secs = self.config.flush_timeout.as_secs(),
            "Flushing publisher"
        );

        let flushed = self.broker.flush(self.config.flush_timeout).await;
        let drained = self.poll();
        self.metrics.broker_queue_depth(self.broker.in_flight());

        match flushed {
            Ok(()) => {
                tracing::info!(drained, "Publisher flushed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, drained, "Publisher flush failed");
                Err(e.into())
            }
        }
    }
}
