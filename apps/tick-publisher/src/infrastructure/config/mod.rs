//! Configuration Module
//!
//! Environment-driven configuration for the tick publisher.

mod settings;

pub use settings::{
    BrokerSettings, ConfigError, DEFAULT_TOPIC, PipelineSettings, QualitySettings, ServerSettings,
    ServiceConfig,
};
