//! Application Layer - Ports and services.
//!
//! The ports define how the ingestion services talk to the transport, the
//! broker, and the metrics backend. The services own the control loop.

/// Port interfaces for the transport, broker, and metrics.
pub mod ports;

/// Validation, publishing, and the ingestion loop.
pub mod services;
