//! ==============================================================================
//! main.rs - telemetry hub entry point
//! ==============================================================================
//!
//! purpose:
//!     boots the hub that sensor nodes push readings to and dashboards watch.
//!
//! responsibilities:
//!     - parse command line and load telemetry.toml
//!     - set up logging
//!     - restore history + alert thresholds from the last snapshot
//!     - serve the http api and observer websocket
//!     - save a final snapshot on ctrl+c / sigterm
//!
//! relationships:
//!     - uses: config.rs (HostConfig)
//!     - uses: persistence.rs (JsonFileStore)
//!     - uses: pipeline.rs (IngestionPipeline::restore / shutdown)
//!     - uses: server.rs (run_server)
//!
//! architecture:
//!
//!     ┌──────────────┐  POST /upload   ┌────────────────────────────────┐
//!     │ sensor nodes │ ──────────────> │         IngestionPipeline       │
//!     └──────────────┘                 │  history ─ stats ─ alerts ─ led │
//!                                      └───────┬───────────────┬────────┘
//!                                              │ try_send      │ every 10th
//!                                              ▼               ▼
//!                                   ┌────────────────┐   ┌────────────┐
//!                                   │ per-observer   │   │ json files │
//!                                   │ queues -> /ws  │   └────────────┘
//!                                   └────────────────┘
//!
//! ==============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use telemetry_hub::config::HostConfig;
use telemetry_hub::persistence::JsonFileStore;
use telemetry_hub::server;
use telemetry_hub::IngestionPipeline;

#[derive(Debug, Parser)]
#[command(name = "telemetry-hub", version, about = "Sensor telemetry hub with live observers")]
struct Cli {
    /// path to telemetry.toml (default: config/telemetry.toml, ../config/telemetry.toml)
    #[arg(short, long, env = "TELEMETRY_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// listen port, overrides [server].port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration
    let mut config = HostConfig::load_or_default(cli.config.as_deref());
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // step 2: logging (RUST_LOG wins over the config file)
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("===========================================================");
    tracing::info!("  Telemetry Hub v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("===========================================================");
    config.log_summary();

    // step 3: restore state from the last snapshot
    let store = Arc::new(JsonFileStore::new(
        &config.storage.data_file,
        &config.storage.alerts_file,
    ));
    let pipeline = Arc::new(IngestionPipeline::restore(store, config.pipeline_settings()).await);

    // step 4: serve until a shutdown signal
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("listening on http://{}", addr);

    let served = server::run_server(listener, pipeline.clone(), shutdown_signal()).await;

    // step 5: final snapshot, even if the server failed
    pipeline.shutdown().await;
    served
}

/// resolves on ctrl+c or sigterm
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for sigterm: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}
