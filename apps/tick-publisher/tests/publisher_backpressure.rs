//! Backpressure behaviour of the publisher against a bounded broker queue.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tick_publisher::{
    BrokerClient, BrokerError, DatagramSource, Delivery, DeliveryHandle, DeliveryMetadata,
    DeliveryReport, DropReason, IngestionPipeline, ManualClock, MarketRecord, PipelineConfig,
    PipelineStats, ProcessOutcome, ProduceError, PublishOutcome, Publisher, PublisherConfig,
    QualityValidator, RecordingMetrics, TransportError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const NOW: i64 = 1_718_900_000_000_000;

/// Broker with a fixed number of queue slots.
///
/// A draining broker empties its queue on flush and reports each delivery;
/// a stalled broker never frees a slot.
struct BoundedBroker {
    capacity: usize,
    drains: bool,
    queued: Mutex<Vec<(DeliveryHandle, Delivery)>>,
    stored: Mutex<Vec<Delivery>>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
    next_handle: Mutex<u64>,
}

impl BoundedBroker {
    fn new(capacity: usize, drains: bool) -> (Self, mpsc::UnboundedReceiver<DeliveryReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        let broker = Self {
            capacity,
            drains,
            queued: Mutex::new(Vec::new()),
            stored: Mutex::new(Vec::new()),
            reports,
            next_handle: Mutex::new(0),
        };
        (broker, rx)
    }

    fn stored_sequences(&self) -> Vec<u64> {
        self.stored
            .lock()
            .iter()
            .map(|d| {
                let value: serde_json::Value = serde_json::from_slice(&d.payload).unwrap();
                value["sequence"].as_u64().unwrap()
            })
            .collect()
    }
}

#[async_trait]
impl BrokerClient for BoundedBroker {
    fn produce(&self, delivery: Delivery) -> Result<DeliveryHandle, ProduceError> {
        let mut queued = self.queued.lock();
        if queued.len() >= self.capacity {
            return Err(ProduceError::QueueFull(delivery));
        }
        let mut next = self.next_handle.lock();
        let handle = DeliveryHandle(*next);
        *next += 1;
        queued.push((handle, delivery));
        Ok(handle)
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        if !self.drains {
            return Err(BrokerError::FlushTimedOut {
                pending: self.queued.lock().len(),
                timeout,
            });
        }

        let drained: Vec<_> = self.queued.lock().drain(..).collect();
        let mut stored = self.stored.lock();
        for (handle, delivery) in drained {
            let offset = stored.len() as u64;
            let _ = self.reports.send(DeliveryReport {
                handle,
                topic: delivery.topic.clone(),
                symbol: delivery.symbol.clone(),
                msg_type: delivery.msg_type.clone(),
                result: Ok(DeliveryMetadata {
                    partition: 0,
                    offset,
                }),
            });
            stored.push(delivery);
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.queued.lock().len()
    }
}

fn record(sequence: u64) -> MarketRecord {
    MarketRecord::decode(
        &serde_json::to_vec(&json!({
            "msgType": "TRADE",
            "symbol": "AAPL",
            "price": 150.0,
            "timestamp": NOW,
            "sequence": sequence,
        }))
        .unwrap(),
    )
    .unwrap()
}

fn publisher(
    broker: BoundedBroker,
    reports: mpsc::UnboundedReceiver<DeliveryReport>,
) -> (Publisher<BoundedBroker>, Arc<RecordingMetrics>, Arc<PipelineStats>) {
    let metrics = Arc::new(RecordingMetrics::default());
    let stats = Arc::new(PipelineStats::new());
    let publisher = Publisher::new(
        broker,
        reports,
        PublisherConfig {
            flush_timeout: Duration::from_millis(10),
            ..PublisherConfig::default()
        },
        metrics.clone(),
        stats.clone(),
    );
    (publisher, metrics, stats)
}

#[tokio::test]
async fn full_queue_is_flushed_and_the_same_record_retried() {
    let (broker, reports) = BoundedBroker::new(2, true);
    let (mut publisher, metrics, stats) = publisher(broker, reports);

    let mut outcomes = Vec::new();
    for seq in 1..=5 {
        outcomes.push(publisher.publish(&record(seq)).await.unwrap());
    }

    assert_eq!(
        outcomes,
        vec![
            PublishOutcome::Enqueued,
            PublishOutcome::Enqueued,
            PublishOutcome::EnqueuedAfterFlush,
            PublishOutcome::Enqueued,
            PublishOutcome::EnqueuedAfterFlush,
        ]
    );

    publisher.shutdown().await.unwrap();

    assert_eq!(publisher.broker().stored_sequences(), vec![1, 2, 3, 4, 5]);
    assert_eq!(metrics.dropped(DropReason::QueueFull), 0);
    assert_eq!(metrics.total_produced(), 5);
    assert_eq!(stats.snapshot().published, 5);
}

#[tokio::test]
async fn stalled_broker_drops_after_one_retry() {
    let (broker, reports) = BoundedBroker::new(1, false);
    let (mut publisher, metrics, stats) = publisher(broker, reports);

    assert_eq!(
        publisher.publish(&record(1)).await.unwrap(),
        PublishOutcome::Enqueued
    );
    assert_eq!(
        publisher.publish(&record(2)).await.unwrap(),
        PublishOutcome::Dropped
    );
    assert_eq!(
        publisher.publish(&record(3)).await.unwrap(),
        PublishOutcome::Dropped
    );

    assert_eq!(metrics.dropped(DropReason::QueueFull), 2);
    assert_eq!(stats.snapshot().dropped, 2);
    assert_eq!(metrics.queue_depth(), Some(1));

    let err = publisher.shutdown().await.unwrap_err();
    assert!(err.to_string().contains("flush"), "{err}");
}

#[tokio::test]
async fn drops_do_not_interrupt_validation() {
    let (broker, reports) = BoundedBroker::new(2, false);
    let (publisher, metrics, stats) = publisher(broker, reports);
    let clock = Arc::new(ManualClock::new(NOW));
    let validator = QualityValidator::with_defaults(clock.clone(), metrics.clone());
    let mut pipeline = IngestionPipeline::new(
        validator,
        publisher,
        metrics.clone(),
        clock,
        stats.clone(),
        PipelineConfig::default(),
    );

    for seq in 1..=5u64 {
        let datagram = serde_json::to_vec(&json!({
            "msgType": "TRADE",
            "symbol": "AAPL",
            "price": 150.0,
            "timestamp": NOW,
            "sequence": seq,
        }))
        .unwrap();
        let outcome = pipeline.process(&datagram).await.unwrap();
        let expected = if seq <= 2 {
            PublishOutcome::Enqueued
        } else {
            PublishOutcome::Dropped
        };
        assert_eq!(
            outcome,
            ProcessOutcome::Published {
                findings: Vec::new(),
                outcome: expected,
            }
        );
    }

    let state = pipeline.validator().symbol_state("AAPL").unwrap();
    assert_eq!(state.last_sequence(), Some(5));
    assert_eq!(metrics.received("AAPL", "TRADE"), 5);
    assert_eq!(stats.snapshot().dropped, 3);
}

struct Datagrams(VecDeque<Vec<u8>>);

#[async_trait]
impl DatagramSource for Datagrams {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.0.pop_front().ok_or(TransportError::Closed)
    }
}

#[tokio::test]
async fn incomplete_final_flush_is_reported_after_every_datagram_is_handled() {
    let (broker, reports) = BoundedBroker::new(1, false);
    let (publisher, metrics, stats) = publisher(broker, reports);
    let clock = Arc::new(ManualClock::new(NOW));
    let validator = QualityValidator::with_defaults(clock.clone(), metrics.clone());
    let pipeline = IngestionPipeline::new(
        validator,
        publisher,
        metrics.clone(),
        clock,
        stats.clone(),
        PipelineConfig::default(),
    );

    let datagrams = (1..=3u64)
        .map(|seq| {
            serde_json::to_vec(&json!({
                "symbol": "AAPL",
                "price": 150.0,
                "timestamp": NOW,
                "sequence": seq,
            }))
            .unwrap()
        })
        .collect();

    let err = pipeline
        .run(Datagrams(datagrams), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("flush"), "{err}");
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.received, 3);
    assert_eq!(snapshot.dropped, 2);
    assert!(!snapshot.running);
}
