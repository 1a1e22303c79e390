//! Ingestion Pipeline
//!
//! The single control loop: receive a datagram, decode it, validate it
//! against per-symbol state, and publish it. One datagram is fully handled
//! before the next is received, so publish order matches arrival order.
//!
//! ```text
//! DatagramSource ──► decode ──► QualityValidator ──► Publisher ──► BrokerClient
//!                      │               │                 │
//!                      └──────────► MetricsSink ◄────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::publisher::{PublishError, PublishOutcome, Publisher};
use super::stats::PipelineStats;
use super::validator::QualityValidator;
use crate::application::ports::{BrokerClient, DatagramSource, MetricsSink, TransportError};
use crate::domain::quality::{Clock, QualityError};
use crate::domain::record::MarketRecord;

/// Default number of records between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000;

/// Default upper bound for end-to-end latency samples.
pub const DEFAULT_LATENCY_WINDOW: Duration = Duration::from_secs(60);

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records between progress log lines. Zero disables progress logging.
    pub progress_interval: u64,
    /// Latency samples at or above this are discarded as clock noise.
    pub latency_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }
}

/// What happened to one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Decoded, validated, and handed to the publisher.
    Published {
        /// Quality findings for the record.
        findings: Vec<QualityError>,
        /// Publisher result.
        outcome: PublishOutcome,
    },
    /// Not a UTF-8 JSON object; discarded.
    Undecodable,
}

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Publishing failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Receive, validate, and publish loop.
pub struct IngestionPipeline<B: BrokerClient> {
    validator: QualityValidator,
    publisher: Publisher<B>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    stats: Arc<PipelineStats>,
    config: PipelineConfig,
    started_at: Instant,
}

impl<B: BrokerClient> IngestionPipeline<B> {
    /// Assemble a pipeline.
    #[must_use]
    pub fn new(
        validator: QualityValidator,
        publisher: Publisher<B>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        stats: Arc<PipelineStats>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            validator,
            publisher,
            metrics,
            clock,
            stats,
            config,
            started_at: Instant::now(),
        }
    }

    /// The validator, for inspecting per-symbol state.
    #[must_use]
    pub const fn validator(&self) -> &QualityValidator {
        &self.validator
    }

    /// The publisher.
    #[must_use]
    pub const fn publisher(&self) -> &Publisher<B> {
        &self.publisher
    }

    /// Handle one datagram end to end.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Publish` if the record could not be handed to
    /// the broker. Decode failures and quality findings are not errors.
    pub async fn process(&mut self, datagram: &[u8]) -> Result<ProcessOutcome, PipelineError> {
        let started = Instant::now();
        let result = self.process_inner(datagram).await;
        self.metrics.processing_duration(started.elapsed());
        result
    }

    async fn process_inner(&mut self, datagram: &[u8]) -> Result<ProcessOutcome, PipelineError> {
        let record = match MarketRecord::decode(datagram) {
            Ok(record) => record,
            Err(e) => {
                self.metrics.quality_error(&QualityError::JsonDecodeError.tag());
                self.stats.record_decode_failure();
                tracing::debug!(error = %e, bytes = datagram.len(), "Discarding undecodable datagram");
                return Ok(ProcessOutcome::Undecodable);
            }
        };

        self.metrics.message_received(&record.symbol_label(), record.msg_type());
        self.stats.record_received();
        self.record_latency(&record);

        let findings = self.validator.validate(&record);
        self.stats.record_findings(findings.len() as u64);

        let outcome = self.publisher.publish(&record).await?;

        self.log_progress();
        Ok(ProcessOutcome::Published { findings, outcome })
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_latency(&self, record: &MarketRecord) {
        let Ok(timestamp) = record.timestamp_micros() else {
            return;
        };
        let latency =
            self.clock.now_micros().saturating_sub(timestamp) as f64 / MICROS_PER_SECOND;
        if latency > 0.0 && latency < self.config.latency_window.as_secs_f64() {
            self.metrics.end_to_end_latency(latency);
        }
    }

    /// Cumulative quality errors, undecodable datagrams included.
    fn quality_errors(&self) -> u64 {
        self.validator
            .total_findings()
            .saturating_add(self.stats.snapshot().decode_failures)
    }

    #[allow(clippy::cast_precision_loss)]
    fn log_progress(&self) {
        let interval = self.config.progress_interval;
        let received = self.stats.received();
        if interval == 0 || received % interval != 0 {
            return;
        }

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let per_second = if elapsed > 0.0 {
            (received as f64 / elapsed).round()
        } else {
            0.0
        };
        tracing::info!(
            received,
            per_second,
            quality_errors = self.quality_errors(),
            sequence_gaps = self.validator.total_sequence_gaps(),
            tracked_symbols = self.validator.tracked_symbols(),
            "Ingestion progress"
        );
    }

    /// Run until the source closes or `cancel` fires, then flush.
    ///
    /// Cancellation is observed between datagrams and while waiting for one;
    /// a datagram already received is always fully processed.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Publish` if the final flush fails.
    pub async fn run<S: DatagramSource>(
        mut self,
        mut source: S,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        self.stats.set_running(true);
        tracing::info!(topic = %self.publisher.topic(), "Ingestion pipeline started");

        loop {
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Shutdown requested, stopping ingestion");
                    break;
                }
                received = source.recv() => received,
            };

            match received {
                Ok(datagram) => {
                    if let Err(e) = self.process(&datagram).await {
                        tracing::error!(error = %e, "Failed to process datagram");
                    }
                }
                Err(TransportError::Closed) => {
                    tracing::info!("Datagram source closed");
                    break;
                }
                Err(TransportError::Io(e)) => {
                    tracing::warn!(error = %e, "Datagram receive failed");
                }
            }
        }

        self.stats.set_running(false);
        drop(source);

        let result = self.publisher.shutdown().await;
        let snapshot = self.stats.snapshot();
        tracing::info!(
            received = snapshot.received,
            published = snapshot.published,
            dropped = snapshot.dropped,
            decode_failures = snapshot.decode_failures,
            "Ingestion pipeline stopped"
        );
        result.map_err(PipelineError::from)
    }
}
