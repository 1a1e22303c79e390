//! Transport Port (Driver Port)
//!
//! Source of raw datagrams for the ingestion pipeline.

use async_trait::async_trait;

/// Datagram receive failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source is exhausted and will produce no more datagrams.
    #[error("transport closed")]
    Closed,
}

/// Port yielding one datagram per call.
#[async_trait]
pub trait DatagramSource: Send {
    /// Receive the next datagram.
    ///
    /// Must be cancel-safe: dropping the future loses no datagram.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` once the source is exhausted, or
    /// `TransportError::Io` on a socket failure.
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
}
