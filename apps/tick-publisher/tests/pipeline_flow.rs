//! End-to-end ingestion tests: scripted datagrams through the pipeline into
//! a commit log on disk.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;
use tick_publisher::{
    CommitLogBroker, CommitLogConfig, DatagramSource, IngestionPipeline, ManualClock,
    PipelineConfig, PipelineStats, Publisher, PublisherConfig, QualityValidator,
    RecordingMetrics, TransportError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const NOW: i64 = 1_718_900_000_000_000;
const TOPIC: &str = "ticks";

/// Yields a fixed list of datagrams, then reports the source closed.
struct ScriptedSource {
    datagrams: VecDeque<Vec<u8>>,
}

impl ScriptedSource {
    fn new(datagrams: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            datagrams: datagrams.into_iter().collect(),
        }
    }
}

#[async_trait]
impl DatagramSource for ScriptedSource {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.datagrams.pop_front().ok_or(TransportError::Closed)
    }
}

/// Yields datagrams pushed through a channel; stays open while the sender lives.
struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl DatagramSource for ChannelSource {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

struct Harness {
    pipeline: IngestionPipeline<CommitLogBroker>,
    metrics: Arc<RecordingMetrics>,
    stats: Arc<PipelineStats>,
    dir: TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let (broker, reports) = CommitLogBroker::connect(CommitLogConfig::new(dir.path(), 64))
        .await
        .unwrap();

    let metrics = Arc::new(RecordingMetrics::default());
    let clock = Arc::new(ManualClock::new(NOW));
    let stats = Arc::new(PipelineStats::new());

    let validator = QualityValidator::with_defaults(clock.clone(), metrics.clone());
    let publisher = Publisher::new(
        broker,
        reports,
        PublisherConfig {
            topic: TOPIC.to_string(),
            ..PublisherConfig::default()
        },
        metrics.clone(),
        stats.clone(),
    );
    let pipeline = IngestionPipeline::new(
        validator,
        publisher,
        metrics.clone(),
        clock,
        stats.clone(),
        PipelineConfig::default(),
    );

    Harness {
        pipeline,
        metrics,
        stats,
        dir,
    }
}

fn tick(symbol: &str, price: f64, sequence: u64) -> Value {
    json!({
        "msgType": "TRADE",
        "symbol": symbol,
        "price": price,
        "size": 100,
        "timestamp": NOW - 1_000,
        "sequence": sequence,
    })
}

fn datagram(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}

fn read_log(dir: &Path) -> Vec<Value> {
    let contents = std::fs::read_to_string(dir.join(format!("{TOPIC}.log"))).unwrap_or_default();
    contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn forwards_every_decodable_record_in_order() {
    let Harness {
        pipeline,
        metrics,
        stats,
        dir,
    } = harness().await;

    let records = vec![
        tick("AAPL", 175.52, 1),
        tick("MSFT", 410.10, 1),
        tick("AAPL", 175.60, 2),
    ];
    let mut datagrams: Vec<Vec<u8>> = records.iter().map(datagram).collect();
    datagrams.insert(1, b"not json".to_vec());

    pipeline
        .run(ScriptedSource::new(datagrams), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(read_log(dir.path()), records);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.received, 3);
    assert_eq!(snapshot.decode_failures, 1);
    assert_eq!(snapshot.published, 3);
    assert_eq!(snapshot.dropped, 0);
    assert!(!snapshot.running);

    assert_eq!(metrics.quality_errors("json_decode_error"), 1);
    assert_eq!(metrics.produced("AAPL", "TRADE"), 2);
    assert_eq!(metrics.produced("MSFT", "TRADE"), 1);
}

#[tokio::test]
async fn out_of_order_sequences_are_flagged_and_still_forwarded() {
    let Harness {
        pipeline,
        metrics,
        stats,
        dir,
    } = harness().await;

    let records: Vec<Value> = [1, 2, 4, 3]
        .into_iter()
        .map(|seq| tick("AAPL", 150.0, seq))
        .collect();

    pipeline
        .run(
            ScriptedSource::new(records.iter().map(datagram)),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(read_log(dir.path()), records);
    assert_eq!(metrics.quality_errors("sequence_gap_1"), 1);
    assert_eq!(metrics.quality_errors("sequence_regression"), 1);
    assert_eq!(metrics.sequence_gaps(), 1);
    assert_eq!(stats.snapshot().quality_findings, 2);
}

#[tokio::test]
async fn price_spike_and_bad_fields_do_not_block_forwarding() {
    let Harness {
        pipeline,
        metrics,
        dir,
        ..
    } = harness().await;

    let mut no_price = tick("TSLA", 1.0, 1);
    no_price.as_object_mut().unwrap().remove("price");
    let records = vec![
        tick("NVDA", 100.0, 1),
        tick("NVDA", 110.0, 2),
        no_price,
        tick("GME", -1.0, 1),
    ];

    pipeline
        .run(
            ScriptedSource::new(records.iter().map(datagram)),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(read_log(dir.path()), records);
    assert_eq!(metrics.quality_errors("price_spike"), 1);
    assert_eq!(metrics.quality_errors("missing_field_price"), 1);
    assert_eq!(metrics.quality_errors("negative_price"), 1);
}

#[tokio::test]
async fn cancellation_stops_the_loop_and_flushes() {
    let Harness {
        pipeline,
        stats,
        dir,
        ..
    } = harness().await;

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let run = tokio::spawn(pipeline.run(ChannelSource { rx }, cancel.clone()));

    tx.send(datagram(&tick("AAPL", 150.0, 1))).unwrap();
    tx.send(datagram(&tick("AAPL", 150.1, 2))).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while stats.received() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline should consume both datagrams");

    cancel.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(read_log(dir.path()).len(), 2);
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.published, 2);
    assert!(!snapshot.running);
    drop(tx);
}

#[tokio::test]
async fn cancelled_before_start_publishes_nothing() {
    let Harness {
        pipeline,
        stats,
        dir,
        ..
    } = harness().await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    pipeline
        .run(
            ScriptedSource::new([datagram(&tick("AAPL", 150.0, 1))]),
            cancel,
        )
        .await
        .unwrap();

    assert!(read_log(dir.path()).is_empty());
    assert_eq!(stats.snapshot().received, 0);
}
