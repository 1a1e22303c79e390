//! Port Interfaces
//!
//! Contracts between the ingestion services and the outside world. Adapters
//! for each port live in the infrastructure layer.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BrokerClient`: Asynchronous producer with a bounded local queue
//! - `MetricsSink`: Counters, gauges, and histograms for the pipeline
//!
//! ## Driver Ports (Inbound)
//!
//! - `DatagramSource`: Stream of raw datagrams feeding the pipeline

mod broker_port;
mod metrics_port;
mod transport_port;

#[cfg(test)]
pub use broker_port::MockBrokerClient;
pub use broker_port::{
    BrokerClient, BrokerError, Delivery, DeliveryError, DeliveryHandle, DeliveryMetadata,
    DeliveryReport, ProduceError,
};
pub use metrics_port::{DropReason, MetricsSink};
pub use transport_port::{DatagramSource, TransportError};
