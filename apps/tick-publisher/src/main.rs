//! Tick Publisher Binary
//!
//! Joins the market-data multicast group and forwards validated records to
//! the commit log.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-publisher
//! ```
//!
//! # Environment Variables
//!
//! - `MULTICAST_GROUP`, `MULTICAST_PORT`, `MULTICAST_INTERFACE`, `RECV_BUFFER_BYTES`
//! - `BROKER_LOG_DIR`, `BROKER_TOPIC`, `BROKER_QUEUE_CAPACITY`
//! - `BROKER_FLUSH_TIMEOUT_SECS`, `BROKER_CONNECT_ATTEMPTS`, `BROKER_CONNECT_DELAY_MS`
//! - `QUALITY_MAX_PRICE`, `QUALITY_SPIKE_THRESHOLD`, `QUALITY_MAX_SKEW_SECS`
//! - `QUALITY_HISTORY_CAPACITY`, `QUALITY_MAX_SYMBOLS`
//! - `METRICS_PORT`: Health and `/metrics` HTTP port (default: 8000)
//! - `PROGRESS_INTERVAL`, `LATENCY_WINDOW_SECS`
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use tick_publisher::application::ports::MetricsSink;
use tick_publisher::domain::quality::Clock;
use tick_publisher::infrastructure::telemetry;
use tick_publisher::{
    CommitLogBroker, HealthServer, HealthServerState, IngestionPipeline, MulticastReceiver,
    PipelineStats, PrometheusMetrics, Publisher, QualityValidator, ServiceConfig, SystemClock,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        span_export = telemetry_guard.is_exporting(),
        "Starting tick publisher"
    );

    let _metrics_handle = init_metrics()?;

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let stats = Arc::new(PipelineStats::new());

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&stats),
    ));
    let health_server = HealthServer::new(
        config.server.metrics_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let (broker, reports) = CommitLogBroker::connect_with_retry(
        config.broker.commit_log_config(),
        &config.broker.retry_policy(),
    )
    .await?;
    broker.ensure_topic(&config.broker.topic).await?;
    stats.set_broker_connected(true);

    let receiver = MulticastReceiver::join(&config.transport)?;

    let metrics: Arc<dyn MetricsSink> = Arc::new(PrometheusMetrics);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let validator = QualityValidator::new(
        config.quality.thresholds.clone(),
        config.quality.max_symbols,
        Arc::clone(&clock),
        Arc::clone(&metrics),
    );
    let publisher = Publisher::new(
        broker,
        reports,
        config.broker.publisher_config(),
        Arc::clone(&metrics),
        Arc::clone(&stats),
    );
    let pipeline = IngestionPipeline::new(
        validator,
        publisher,
        metrics,
        clock,
        Arc::clone(&stats),
        config.pipeline.pipeline_config(),
    );

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tracing::info!("Tick publisher ready");

    if let Err(e) = pipeline.run(receiver, shutdown_token.clone()).await {
        tracing::error!(error = %e, "Final flush incomplete, undelivered records dropped");
    }

    stats.set_broker_connected(false);
    shutdown_token.cancel();

    tracing::info!("Tick publisher stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        group = %config.transport.group,
        port = config.transport.port,
        topic = %config.broker.topic,
        log_dir = %config.broker.log_dir.display(),
        queue_capacity = config.broker.queue_capacity,
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        max_price = %config.quality.thresholds.max_price,
        spike_threshold = %config.quality.thresholds.spike_threshold,
        max_skew_secs = config.quality.thresholds.max_skew.as_secs(),
        history_capacity = config.quality.thresholds.history_capacity,
        max_symbols = config.quality.max_symbols,
        "Quality thresholds"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM, then cancel.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
