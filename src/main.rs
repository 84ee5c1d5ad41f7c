//! Geo service proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Viewer request
//!     ──────────────▶ http server ──▶ handlers ──┬──▶ ProxyEndpoint ──▶ HeaderForwarder ──┐
//!                                                │                                        │
//!                                                ├──▶ CapabilitiesNegotiator ─────────────┤
//!                                                │                                        ▼
//!                                                │                               TeeingHttpClient
//!                                                │                                        │
//!                                                └──▶ geometry (crs, simplifier)          ▼
//!                                                                                  WMS / WFS service
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use geoservice_proxy::config::loader::load_config;
use geoservice_proxy::config::ProxyConfig;
use geoservice_proxy::observability::{logging::init_logging, metrics::init_metrics};
use geoservice_proxy::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "geoservice-proxy")]
#[command(about = "Proxy for WMS/WFS services with geometry preparation", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "geoproxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        ProxyConfig::default()
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "geoservice-proxy starting");
    if !cli.config.exists() {
        tracing::warn!(path = %cli.config.display(), "Configuration file not found, using defaults");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        request_timeout_secs = config.timeouts.request_secs,
        max_geometry_bytes = config.geometry.max_bytes(),
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    let signal = shutdown.clone();
    tokio::spawn(async move { signal.trigger_on_ctrl_c().await });

    let server = HttpServer::new(config)?;
    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
