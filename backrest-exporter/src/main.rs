//! pgBackRest Exporter - Main entry point

use anyhow::Result;
use backrest_exporter::api::{self, AppState};
use backrest_exporter::collector::Collector;
use backrest_exporter::daemon::shutdown::ShutdownCoordinator;
use backrest_exporter::registry::PrometheusSink;
use backrest_exporter::source::PgBackRestSource;
use backrest_exporter::{config::Config, utils};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Seconds between collections (overrides config)
    #[arg(short, long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = args.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };
    if let Some(port) = args.port {
        config.exporter.port = port;
    }
    if let Some(interval) = args.interval {
        config.exporter.collect_interval_secs = interval;
    }
    config.validate()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, &config.log.format)?;

    // Initialize start time for uptime tracking
    api::health::init_start_time();

    tracing::info!("Starting backrest-exporter v{}", env!("CARGO_PKG_VERSION"));

    let shutdown_coordinator = ShutdownCoordinator::new();

    // Metric registry and collection loop
    let sink = Arc::new(PrometheusSink::new()?);
    let source = Arc::new(PgBackRestSource::new(&config.backrest));
    let collector = Arc::new(Collector::new(
        source.clone(),
        source,
        sink.clone(),
        config.backrest.clone(),
    ));
    let collector_handle = collector.start(config.collect_interval(), shutdown_coordinator.token());

    let app = api::create_router(AppState { sink }, &config.exporter.metrics_path);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.exporter.port));
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Metrics endpoint: http://{}{}", addr, config.exporter.metrics_path);
    tracing::info!("Health endpoint: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server_token = shutdown_coordinator.token();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_token.cancelled().await;
    });
    let server_handle = tokio::spawn(async move { server.await });

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    // Wait for the running collection to finish
    if tokio::time::timeout(Duration::from_secs(10), collector_handle).await.is_err() {
        tracing::warn!("Collector shutdown timeout");
    }

    // Wait for server to finish (with timeout)
    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    Ok(())
}
