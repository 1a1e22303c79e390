//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `QualityValidator`: Applies quality rules and owns per-symbol state
//! - `Publisher`: Hands records to the broker with flush-and-retry on overflow
//! - `IngestionPipeline`: The receive, validate, publish loop
//! - `PipelineStats`: Counters shared with the health endpoint

mod pipeline;
mod publisher;
mod stats;
mod validator;

pub use pipeline::{
    DEFAULT_LATENCY_WINDOW, DEFAULT_PROGRESS_INTERVAL, IngestionPipeline, PipelineConfig,
    PipelineError, ProcessOutcome,
};
pub use publisher::{
    DEFAULT_FLUSH_TIMEOUT, PublishError, PublishOutcome, Publisher, PublisherConfig,
};
pub use stats::{PipelineSnapshot, PipelineStats};
pub use validator::QualityValidator;
