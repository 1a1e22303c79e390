//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process
//! plumbing (configuration, health endpoint, telemetry).

/// Commit log broker adapter and startup retry policy.
pub mod broker;

/// Multicast UDP datagram source.
pub mod transport;

/// Configuration loaded from the environment.
pub mod config;

/// Health check and metrics HTTP endpoint.
pub mod health;

/// Prometheus and recording metrics sinks.
pub mod metrics;

/// Logging and OpenTelemetry tracing setup.
pub mod telemetry;
