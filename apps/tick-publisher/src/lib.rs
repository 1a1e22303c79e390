#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss
    )
)]

//! Tick Publisher - Market Data Ingestion and Quality Gate
//!
//! Receives market-data datagrams from a multicast group, checks each record
//! against the prior state of its symbol, and forwards every record to a
//! commit-log broker. Quality findings are annotations reported as metrics;
//! they never stop a record from being forwarded.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Records and quality rules
//!   - `record`: Decoded datagram with lazy field parsing
//!   - `quality`: Findings, thresholds, per-symbol state, `assess`
//!
//! - **Application**: Ports and services
//!   - `ports`: `DatagramSource`, `BrokerClient`, `MetricsSink`
//!   - `services`: `QualityValidator`, `Publisher`, `IngestionPipeline`
//!
//! - **Infrastructure**: Adapters and plumbing
//!   - `transport`: Multicast UDP receiver
//!   - `broker`: File-backed commit log with bounded queue
//!   - `metrics`: Prometheus sink and recording fake
//!   - `config`, `health`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! multicast ──► decode ──► validate ──► publish ──► commit log
//!                                          ▲            │
//!                                          └─ reports ◄─┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Records and quality rules with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::quality::{
    Clock, ManualClock, QualityError, QualityThresholds, SymbolState, SystemClock, assess,
};
pub use domain::record::{DecodeError, MarketRecord, RequiredField};

// Ports
pub use application::ports::{
    BrokerClient, BrokerError, DatagramSource, Delivery, DeliveryError, DeliveryHandle,
    DeliveryMetadata, DeliveryReport, DropReason, MetricsSink, ProduceError,
    TransportError,
};

// Services
pub use application::services::{
    IngestionPipeline, PipelineConfig, PipelineError, PipelineSnapshot, PipelineStats,
    ProcessOutcome, PublishError, PublishOutcome, Publisher, PublisherConfig, QualityValidator,
};

// Adapters
pub use infrastructure::broker::{CommitLogBroker, CommitLogConfig, RetryPolicy};
pub use infrastructure::transport::{MulticastReceiver, MulticastSettings};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{PrometheusMetrics, RecordingMetrics, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
