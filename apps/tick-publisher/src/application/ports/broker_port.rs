//! Broker Port (Driven Port)
//!
//! Interface for an asynchronous message-broker producer.
//!
//! `produce` only enqueues into a bounded local queue. Delivery outcomes are
//! reported later as `DeliveryReport`s on a channel handed out by the
//! adapter when it is constructed; the publisher drains that channel on
//! every publish and on shutdown.

use std::time::Duration;

use async_trait::async_trait;

/// A record ready to be written to a topic.
///
/// `symbol` and `msg_type` ride along so delivery reports can be attributed
/// without decoding the payload again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Destination topic.
    pub topic: String,
    /// Serialized record.
    pub payload: Vec<u8>,
    /// Symbol label of the record.
    pub symbol: String,
    /// Message type label of the record.
    pub msg_type: String,
}

/// Opaque handle the broker assigns to an accepted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryHandle(pub u64);

/// Where the broker stored a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryMetadata {
    /// Partition written to.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: u64,
}

/// Why the broker could not store a delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Storage write failed.
    #[error("broker I/O error: {0}")]
    Io(String),

    /// Broker refused the delivery.
    #[error("broker rejected delivery: {0}")]
    Rejected(String),
}

/// Asynchronous outcome of one accepted delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handle returned by `produce`.
    pub handle: DeliveryHandle,
    /// Topic the delivery targeted.
    pub topic: String,
    /// Symbol label of the delivered record.
    pub symbol: String,
    /// Message type label of the delivered record.
    pub msg_type: String,
    /// Storage location on success.
    pub result: Result<DeliveryMetadata, DeliveryError>,
}

/// Synchronous rejection from `produce`.
#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    /// Local queue is at capacity. The delivery is handed back for retry.
    #[error("local producer queue is full")]
    QueueFull(Delivery),

    /// Producer has been shut down.
    #[error("producer is closed")]
    Closed,
}

/// Broker-level failure.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Broker could not be reached.
    #[error("broker unavailable: {message}")]
    Unavailable {
        /// Failure detail.
        message: String,
    },

    /// Topic name is not acceptable to the broker.
    #[error("invalid topic name: {0:?}")]
    InvalidTopic(String),

    /// Outstanding deliveries did not complete in time.
    #[error("flush timed out after {timeout:?} with {pending} deliveries pending")]
    FlushTimedOut {
        /// Deliveries still in flight.
        pending: usize,
        /// Time waited.
        timeout: Duration,
    },

    /// Underlying I/O failure.
    #[error("broker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port for producing records to a message broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Enqueue a delivery without waiting for the broker.
    ///
    /// # Errors
    ///
    /// Returns `ProduceError::QueueFull` with the original delivery when the
    /// local queue is at capacity.
    fn produce(&self, delivery: Delivery) -> Result<DeliveryHandle, ProduceError>;

    /// Wait until every accepted delivery has been reported, or `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::FlushTimedOut` when deliveries are still pending
    /// after `timeout`.
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;

    /// Deliveries accepted but not yet reported.
    fn in_flight(&self) -> usize;
}
