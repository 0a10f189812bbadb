//! kvplug server
//!
//! Loads the storage configuration, registers every storage instance and
//! serves the batch RPC until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use kvplug::config::Config;
use kvplug::connection::ConnectionStats;
use kvplug::service::BatchService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Pluggable key-value storage server
#[derive(Parser, Debug)]
#[command(name = "kvplug")]
#[command(version)]
struct Args {
    /// TOML configuration file. Without one a single memory storage named
    /// "memory" is served.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("kvplug v{}", kvplug::VERSION);

    let (registry, sweepers) = config.build_registry();
    let registry = Arc::new(registry);
    info!(storages = ?registry.names(), "Storages ready");

    let mut service = BatchService::new(Arc::clone(&registry));
    if let Some(deadline) = config.server.request_timeout() {
        service = service.with_deadline(deadline);
    }

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address()))?;
    info!("Listening on {}", config.server.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    kvplug::server::serve(
        listener,
        service.clone(),
        Arc::clone(&stats),
        shutdown,
        config.server.shutdown_grace(),
    )
    .await;

    for sweeper in &sweepers {
        sweeper.stop();
    }
    registry.close_all().await;

    let service_stats = service.stats();
    info!(
        requests = service_stats.requests.load(std::sync::atomic::Ordering::Relaxed),
        failures = service_stats.failures.load(std::sync::atomic::Ordering::Relaxed),
        connections = stats.connections_accepted.load(std::sync::atomic::Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}
