//! File-Backed Commit Log Broker
//!
//! Append-only broker adapter. Each topic is one partition stored as a
//! newline-delimited segment file `<dir>/<topic>.log`; a record's offset is
//! its line number. Offsets survive restarts because the segment is scanned
//! when first opened.
//!
//! # Delivery Flow
//!
//! ```text
//! produce() ──► bounded queue ──► dispatcher task ──► segment files
//!                                       │
//!                                       └──► DeliveryReport channel
//! ```
//!
//! `produce` never waits. The dispatcher writes in batches, flushes each
//! touched segment, then reports every delivery in the batch. A failed write
//! or flush fails the deliveries it covers and reopens the segment.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use super::retry::RetryPolicy;
use crate::application::ports::{
    BrokerClient, BrokerError, Delivery, DeliveryError, DeliveryHandle, DeliveryMetadata,
    DeliveryReport, ProduceError,
};

/// Longest accepted topic name.
pub const MAX_TOPIC_LEN: usize = 249;

const SEGMENT_EXTENSION: &str = "log";
const DEFAULT_BATCH_SIZE: usize = 512;

// =============================================================================
// Configuration
// =============================================================================

/// Commit log adapter settings.
#[derive(Debug, Clone)]
pub struct CommitLogConfig {
    /// Directory holding the segment files.
    pub dir: PathBuf,
    /// Maximum deliveries accepted but not yet reported.
    pub queue_capacity: usize,
    /// Maximum deliveries written per dispatcher batch.
    pub batch_size: usize,
}

impl CommitLogConfig {
    /// Settings for `dir` with the given queue bound.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, queue_capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            queue_capacity,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Check a topic name: 1 to 249 characters of `[A-Za-z0-9._-]`, not `.` or `..`.
///
/// # Errors
///
/// Returns `BrokerError::InvalidTopic` otherwise.
pub fn validate_topic(topic: &str) -> Result<(), BrokerError> {
    let valid_chars = topic
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if topic.is_empty() || topic.len() > MAX_TOPIC_LEN || !valid_chars || topic == "." || topic == ".."
    {
        return Err(BrokerError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

fn segment_path(dir: &Path, topic: &str) -> PathBuf {
    dir.join(format!("{topic}.{SEGMENT_EXTENSION}"))
}

// =============================================================================
// In-Flight Tracking
// =============================================================================

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let previous = self.count.fetch_sub(n, Ordering::AcqRel);
        if previous == n {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Broker
// =============================================================================

struct Envelope {
    handle: DeliveryHandle,
    delivery: Delivery,
}

/// Commit log broker client.
pub struct CommitLogBroker {
    queue: mpsc::Sender<Envelope>,
    in_flight: Arc<InFlight>,
    next_handle: AtomicU64,
    capacity: usize,
    dir: PathBuf,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for CommitLogBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLogBroker")
            .field("dir", &self.dir)
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

impl CommitLogBroker {
    /// Open the log directory and start the dispatcher.
    ///
    /// Returns the client and the receiver for its delivery reports.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Io` if the directory cannot be created or is
    /// not a directory.
    pub async fn connect(
        config: CommitLogConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DeliveryReport>), BrokerError> {
        tokio::fs::create_dir_all(&config.dir).await?;
        let metadata = tokio::fs::metadata(&config.dir).await?;
        if !metadata.is_dir() {
            return Err(BrokerError::Unavailable {
                message: format!("{} is not a directory", config.dir.display()),
            });
        }

        let capacity = config.queue_capacity.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(InFlight::default());

        let dispatcher = Dispatcher {
            dir: config.dir.clone(),
            batch_size: config.batch_size.max(1),
            segments: HashMap::new(),
            reports: report_tx,
            in_flight: in_flight.clone(),
        };
        let dispatcher = tokio::spawn(dispatcher.run(queue_rx));

        tracing::info!(
            dir = %config.dir.display(),
            queue_capacity = capacity,
            "Commit log broker connected"
        );

        Ok((
            Self {
                queue: queue_tx,
                in_flight,
                next_handle: AtomicU64::new(0),
                capacity,
                dir: config.dir,
                dispatcher,
            },
            report_rx,
        ))
    }

    /// `connect`, retried according to `policy`.
    ///
    /// # Errors
    ///
    /// Returns the last connection error once the attempts are exhausted.
    pub async fn connect_with_retry(
        config: CommitLogConfig,
        policy: &RetryPolicy,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DeliveryReport>), BrokerError> {
        policy
            .run("commit log connect", || Self::connect(config.clone()))
            .await
    }

    /// Validate a topic name and create its segment if missing.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::InvalidTopic` for a bad name or
    /// `BrokerError::Io` if the segment cannot be created.
    pub async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError> {
        validate_topic(topic)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(&self.dir, topic))
            .await?;
        Ok(())
    }

    /// Directory holding the segments.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop accepting deliveries and wait for the dispatcher to drain.
    pub async fn close(self) {
        drop(self.queue);
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "Commit log dispatcher panicked");
        }
    }
}

#[async_trait]
impl BrokerClient for CommitLogBroker {
    fn produce(&self, delivery: Delivery) -> Result<DeliveryHandle, ProduceError> {
        if self.queue.is_closed() {
            return Err(ProduceError::Closed);
        }
        if self.in_flight.get() >= self.capacity {
            return Err(ProduceError::QueueFull(delivery));
        }

        let handle = DeliveryHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.in_flight.acquire();
        match self.queue.try_send(Envelope { handle, delivery }) {
            Ok(()) => Ok(handle),
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                self.in_flight.release(1);
                Err(ProduceError::QueueFull(envelope.delivery))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.in_flight.release(1);
                Err(ProduceError::Closed)
            }
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        tokio::time::timeout(timeout, self.in_flight.wait_idle())
            .await
            .map_err(|_| BrokerError::FlushTimedOut {
                pending: self.in_flight.get(),
                timeout,
            })
    }

    fn in_flight(&self) -> usize {
        self.in_flight.get()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

struct Segment {
    writer: BufWriter<File>,
    next_offset: u64,
}

impl Segment {
    async fn open(path: &Path) -> io::Result<Self> {
        let next_offset = count_records(path).await?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            writer: BufWriter::new(file),
            next_offset,
        })
    }

    async fn append(&mut self, payload: &[u8]) -> io::Result<u64> {
        self.writer.write_all(payload).await?;
        self.writer.write_all(b"\n").await?;
        let offset = self.next_offset;
        self.next_offset += 1;
        Ok(offset)
    }
}

async fn count_records(path: &Path) -> io::Result<u64> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut buf = vec![0u8; 64 * 1024];
    let mut records = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(records);
        }
        records += buf[..n].iter().filter(|b| **b == b'\n').count() as u64;
    }
}

struct Dispatcher {
    dir: PathBuf,
    batch_size: usize,
    segments: HashMap<String, Segment>,
    reports: mpsc::UnboundedSender<DeliveryReport>,
    in_flight: Arc<InFlight>,
}

type Written = (Envelope, Result<DeliveryMetadata, DeliveryError>);

impl Dispatcher {
    async fn run(mut self, mut queue: mpsc::Receiver<Envelope>) {
        let mut batch = Vec::with_capacity(self.batch_size);
        while queue.recv_many(&mut batch, self.batch_size).await > 0 {
            let count = batch.len();
            let mut written = Vec::with_capacity(count);
            for envelope in batch.drain(..) {
                let result = self.write(&envelope.delivery).await;
                written.push((envelope, result));
            }
            self.flush_segments(&mut written).await;

            for (envelope, result) in written {
                self.report(envelope, result);
            }
            self.in_flight.release(count);
        }
        self.flush_segments(&mut Vec::new()).await;
        tracing::debug!("Commit log dispatcher stopped");
    }

    async fn write(&mut self, delivery: &Delivery) -> Result<DeliveryMetadata, DeliveryError> {
        validate_topic(&delivery.topic).map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        if delivery.payload.contains(&b'\n') {
            return Err(DeliveryError::Rejected(
                "payload contains a newline".to_string(),
            ));
        }

        if !self.segments.contains_key(&delivery.topic) {
            let segment = Segment::open(&segment_path(&self.dir, &delivery.topic))
                .await
                .map_err(|e| DeliveryError::Io(e.to_string()))?;
            self.segments.insert(delivery.topic.clone(), segment);
        }
        let Some(segment) = self.segments.get_mut(&delivery.topic) else {
            return Err(DeliveryError::Io("segment unavailable".to_string()));
        };

        match segment.append(&delivery.payload).await {
            Ok(offset) => Ok(DeliveryMetadata {
                partition: 0,
                offset,
            }),
            Err(e) => {
                tracing::error!(topic = %delivery.topic, error = %e, "Segment write failed");
                self.segments.remove(&delivery.topic);
                Err(DeliveryError::Io(e.to_string()))
            }
        }
    }

    async fn flush_segments(&mut self, written: &mut [Written]) {
        let mut failed = Vec::new();
        for (topic, segment) in &mut self.segments {
            if let Err(e) = segment.writer.flush().await {
                tracing::error!(topic = %topic, error = %e, "Segment flush failed");
                failed.push((topic.clone(), e.to_string()));
            }
        }

        for (topic, message) in failed {
            self.segments.remove(&topic);
            for (envelope, result) in written.iter_mut() {
                if envelope.delivery.topic == topic && result.is_ok() {
                    *result = Err(DeliveryError::Io(message.clone()));
                }
            }
        }
    }

    fn report(&self, envelope: Envelope, result: Result<DeliveryMetadata, DeliveryError>) {
        let Envelope { handle, delivery } = envelope;
        let report = DeliveryReport {
            handle,
            topic: delivery.topic,
            symbol: delivery.symbol,
            msg_type: delivery.msg_type,
            result,
        };
        if self.reports.send(report).is_err() {
            tracing::trace!(handle = handle.0, "Delivery report receiver dropped");
        }
    }
}
