use airlog_uploader::config::Config;
use airlog_uploader::scanner;
use airlog_uploader::upload_client::HttpUploadClient;
use airlog_uploader::uploader::Uploader;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Airlog recording uploader"
    );

    // Validate configuration
    config.validate()?;

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Build the upload pipeline
    let transport = Arc::new(
        HttpUploadClient::new(config.service.request_timeout())
            .context("Failed to initialize upload client")?,
    );
    let uploader = Uploader::new(transport);
    uploader.start();

    // Recover recordings left behind by a previous run
    let recovered = scanner::scan_pending_uploads(&uploader, &config.devices, &config.mixers).await;
    info!(files = recovered, "Startup scan complete");

    // Spawn periodic stats logging
    let stats_handle = tokio::spawn({
        let uploader = uploader.clone();
        let interval = config.service.stats_interval();
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                let stats = uploader.stats();
                info!(
                    queued = uploader.queue_depth(),
                    enqueued = stats.tasks_enqueued,
                    succeeded = stats.uploads_succeeded,
                    failed = stats.uploads_failed,
                    "Uploader stats"
                );
            }
        }
    });

    info!("Uploader started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down uploader");

    stats_handle.abort();
    uploader.shutdown().await;

    log_final_stats(&uploader);

    info!("Uploader stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Log final statistics on shutdown
fn log_final_stats(uploader: &Uploader) {
    let stats = uploader.stats();
    info!(
        enqueued = stats.tasks_enqueued,
        duplicates = stats.duplicates_ignored,
        rejected = stats.tasks_rejected,
        attempted = stats.uploads_attempted,
        succeeded = stats.uploads_succeeded,
        failed = stats.uploads_failed,
        retries = stats.retries,
        deleted = stats.files_deleted,
        renamed = stats.files_renamed,
        still_queued = uploader.queue_depth(),
        "Final uploader stats"
    );
}
