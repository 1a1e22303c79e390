//! Service Configuration Settings
//!
//! Configuration for the tick publisher, loaded from environment variables.
//! Unparseable optional values fall back to their defaults with a warning;
//! the topic and the multicast group are validated and fail startup.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{
    DEFAULT_FLUSH_TIMEOUT, DEFAULT_LATENCY_WINDOW, DEFAULT_PROGRESS_INTERVAL, PipelineConfig,
    PublisherConfig,
};
use crate::domain::quality::{DEFAULT_MAX_SYMBOLS, QualityThresholds};
use crate::infrastructure::broker::{CommitLogConfig, RetryPolicy};
use crate::infrastructure::transport::MulticastSettings;

/// Default broker topic.
pub const DEFAULT_TOPIC: &str = "market.ticks";

/// Broker adapter settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Commit log directory.
    pub log_dir: PathBuf,
    /// Topic every record is written to.
    pub topic: String,
    /// Local delivery queue bound.
    pub queue_capacity: usize,
    /// Flush timeout for backpressure and shutdown.
    pub flush_timeout: Duration,
    /// Startup connection attempts.
    pub connect_attempts: u32,
    /// Delay between startup connection attempts.
    pub connect_delay: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./data/commit-log"),
            topic: DEFAULT_TOPIC.to_string(),
            queue_capacity: 100_000,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            connect_attempts: 30,
            connect_delay: Duration::from_millis(2_000),
        }
    }
}

impl BrokerSettings {
    /// Commit log adapter settings.
    #[must_use]
    pub fn commit_log_config(&self) -> CommitLogConfig {
        CommitLogConfig::new(self.log_dir.clone(), self.queue_capacity)
    }

    /// Startup retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.connect_attempts, self.connect_delay)
    }

    /// Publisher settings.
    #[must_use]
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            topic: self.topic.clone(),
            flush_timeout: self.flush_timeout,
        }
    }
}

/// Quality check settings.
#[derive(Debug, Clone)]
pub struct QualitySettings {
    /// Rule thresholds.
    pub thresholds: QualityThresholds,
    /// Symbols tracked before least-recently-used eviction.
    pub max_symbols: usize,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            thresholds: QualityThresholds::default(),
            max_symbols: DEFAULT_MAX_SYMBOLS,
        }
    }
}

/// Ingestion loop settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Records between progress log lines.
    pub progress_interval: u64,
    /// Upper bound for latency samples.
    pub latency_window: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }
}

impl PipelineSettings {
    /// Pipeline settings for the service layer.
    #[must_use]
    pub const fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            progress_interval: self.progress_interval,
            latency_window: self.latency_window,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port serving `/metrics` and the health endpoints.
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 8000 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Multicast transport settings.
    pub transport: MulticastSettings,
    /// Broker adapter settings.
    pub broker: BrokerSettings,
    /// Quality check settings.
    pub quality: QualitySettings,
    /// Ingestion loop settings.
    pub pipeline: PipelineSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BROKER_TOPIC` is empty or `MULTICAST_GROUP` is
    /// not an IPv4 multicast address.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as `from_env`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let group = match env.raw("MULTICAST_GROUP") {
            Some(raw) => parse_multicast_group(&raw)?,
            None => defaults.transport.group,
        };
        let transport = MulticastSettings {
            group,
            port: env.parse("MULTICAST_PORT", defaults.transport.port),
            interface: env.parse("MULTICAST_INTERFACE", defaults.transport.interface),
            recv_buffer_bytes: env.parse("RECV_BUFFER_BYTES", defaults.transport.recv_buffer_bytes),
        };

        let topic = env
            .raw("BROKER_TOPIC")
            .unwrap_or(defaults.broker.topic);
        if topic.trim().is_empty() {
            return Err(ConfigError::EmptyValue("BROKER_TOPIC".to_string()));
        }
        let broker = BrokerSettings {
            log_dir: env
                .raw("BROKER_LOG_DIR")
                .filter(|v| !v.is_empty())
                .map_or(defaults.broker.log_dir, PathBuf::from),
            topic,
            queue_capacity: env.parse("BROKER_QUEUE_CAPACITY", defaults.broker.queue_capacity),
            flush_timeout: env.duration_secs(
                "BROKER_FLUSH_TIMEOUT_SECS",
                defaults.broker.flush_timeout,
            ),
            connect_attempts: env.parse(
                "BROKER_CONNECT_ATTEMPTS",
                defaults.broker.connect_attempts,
            ),
            connect_delay: env.duration_millis(
                "BROKER_CONNECT_DELAY_MS",
                defaults.broker.connect_delay,
            ),
        };

        let default_thresholds = defaults.quality.thresholds;
        let quality = QualitySettings {
            thresholds: QualityThresholds {
                max_price: env.parse::<Decimal>("QUALITY_MAX_PRICE", default_thresholds.max_price),
                spike_threshold: env.parse::<Decimal>(
                    "QUALITY_SPIKE_THRESHOLD",
                    default_thresholds.spike_threshold,
                ),
                max_skew: env.duration_secs("QUALITY_MAX_SKEW_SECS", default_thresholds.max_skew),
                history_capacity: env.parse(
                    "QUALITY_HISTORY_CAPACITY",
                    default_thresholds.history_capacity,
                ),
            },
            max_symbols: env.parse("QUALITY_MAX_SYMBOLS", defaults.quality.max_symbols),
        };

        let pipeline = PipelineSettings {
            progress_interval: env.parse("PROGRESS_INTERVAL", defaults.pipeline.progress_interval),
            latency_window: env.duration_secs(
                "LATENCY_WINDOW_SECS",
                defaults.pipeline.latency_window,
            ),
        };

        let server = ServerSettings {
            metrics_port: env.parse("METRICS_PORT", defaults.server.metrics_port),
        };

        Ok(Self {
            transport,
            broker,
            quality,
            pipeline,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable holds an unusable value.
    #[error("environment variable {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

fn parse_multicast_group(raw: &str) -> Result<Ipv4Addr, ConfigError> {
    let invalid = |reason| ConfigError::InvalidValue {
        key: "MULTICAST_GROUP".to_string(),
        value: raw.to_string(),
        reason,
    };
    let group: Ipv4Addr = raw.trim().parse().map_err(|_| invalid("not an IPv4 address"))?;
    if !group.is_multicast() {
        return Err(invalid("not a multicast address"));
    }
    Ok(group)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting, using default");
            default
        })
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs()))
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.parse(key, default_ms))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal_macros::dec;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.transport.group, Ipv4Addr::new(239, 255, 0, 1));
        assert_eq!(config.transport.port, 30001);
        assert_eq!(config.transport.recv_buffer_bytes, 4_194_304);
        assert_eq!(config.broker.topic, "market.ticks");
        assert_eq!(config.broker.queue_capacity, 100_000);
        assert_eq!(config.broker.flush_timeout, Duration::from_secs(30));
        assert_eq!(config.broker.connect_attempts, 30);
        assert_eq!(config.broker.connect_delay, Duration::from_secs(2));
        assert_eq!(config.server.metrics_port, 8000);
        assert_eq!(config.pipeline.progress_interval, 1_000);
        assert_eq!(config.pipeline.latency_window, Duration::from_secs(60));
        assert_eq!(config.quality.thresholds.max_price, dec!(10000));
        assert_eq!(config.quality.thresholds.spike_threshold, dec!(0.05));
        assert_eq!(config.quality.thresholds.history_capacity, 100);
        assert_eq!(config.quality.max_symbols, 10_000);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("MULTICAST_GROUP", "239.1.2.3"),
            ("MULTICAST_PORT", "40000"),
            ("BROKER_TOPIC", "ticks.eu"),
            ("BROKER_QUEUE_CAPACITY", "50"),
            ("BROKER_FLUSH_TIMEOUT_SECS", "5"),
            ("QUALITY_MAX_PRICE", "500.5"),
            ("QUALITY_SPIKE_THRESHOLD", "0.1"),
            ("QUALITY_MAX_SKEW_SECS", "5"),
            ("PROGRESS_INTERVAL", "10"),
        ])
        .unwrap();

        assert_eq!(config.transport.group, Ipv4Addr::new(239, 1, 2, 3));
        assert_eq!(config.transport.port, 40_000);
        assert_eq!(config.broker.topic, "ticks.eu");
        assert_eq!(config.broker.queue_capacity, 50);
        assert_eq!(config.broker.flush_timeout, Duration::from_secs(5));
        assert_eq!(config.quality.thresholds.max_price, dec!(500.5));
        assert_eq!(config.quality.thresholds.spike_threshold, dec!(0.1));
        assert_eq!(config.quality.thresholds.max_skew, Duration::from_secs(5));
        assert_eq!(config.pipeline.progress_interval, 10);
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = config_from(&[
            ("MULTICAST_PORT", "not-a-port"),
            ("BROKER_CONNECT_DELAY_MS", "-1"),
            ("QUALITY_MAX_PRICE", "lots"),
        ])
        .unwrap();
        assert_eq!(config.transport.port, 30001);
        assert_eq!(config.broker.connect_delay, Duration::from_secs(2));
        assert_eq!(config.quality.thresholds.max_price, dec!(10000));
    }

    #[test]
    fn empty_topic_is_rejected() {
        let err = config_from(&[("BROKER_TOPIC", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(key) if key == "BROKER_TOPIC"));
    }

    #[test]
    fn bad_multicast_group_is_rejected() {
        let err = config_from(&[("MULTICAST_GROUP", "nope")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = config_from(&[("MULTICAST_GROUP", "10.0.0.1")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                reason: "not a multicast address",
                ..
            }
        ));
    }

    #[test]
    fn derived_configs_carry_settings() {
        let config = config_from(&[("BROKER_CONNECT_ATTEMPTS", "3")]).unwrap();
        assert_eq!(config.broker.retry_policy().max_attempts, 3);
        assert_eq!(config.broker.publisher_config().topic, "market.ticks");
        assert_eq!(config.broker.commit_log_config().queue_capacity, 100_000);
        assert_eq!(config.pipeline.pipeline_config().progress_interval, 1_000);
    }
}
