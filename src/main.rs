// Allow dead code - registry read surface and uptime helpers are kept for API completeness
#![allow(dead_code)]

//! Nodewatch - Peer Liveness Monitor
//!
//! Standalone service that tracks which peers of a Bitcoin-family network
//! are alive and which software versions they run, as seen through a set of
//! trusted gateway nodes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        NODEWATCH                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Gateway Poller     ←── getpeerinfo from trusted nodes      │
//! │  Admission Checks   ←── ban score, sync state, version      │
//! │  Peer Registry      ←── RocksDB rows, history, sightings    │
//! │  Stale Sweep        ←── grace-window downgrades             │
//! │  Relay Monitor      ←── direct probes of our own relays     │
//! │  Uptime Calculator  ←── sessions and windowed percentages   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

mod config;
mod reconcile;
mod registry;
mod relay;
mod rpc;
mod types;
mod uptime;
mod validate;

use config::MonitorConfig;
use registry::PeerRegistry;

/// Nodewatch - peer liveness and version tracking service
#[derive(Parser, Debug)]
#[command(name = "nodewatch")]
#[command(author = "Nodewatch Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Peer liveness and version tracking service", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "nodewatch.toml")]
    config: PathBuf,

    /// Data directory for the peer registry
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Override the observation cycle interval (seconds)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Override the staleness grace window (seconds)
    #[arg(long)]
    grace_secs: Option<u64>,

    /// Override the minimum accepted protocol version
    #[arg(long)]
    min_version: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    info!("🔭 Nodewatch v{}", env!("CARGO_PKG_VERSION"));
    info!("   Peer liveness and version tracking for Bitcoin-family networks");

    // Create data directory
    tokio::fs::create_dir_all(&args.data_dir).await?;

    // Load configuration
    let config = if args.config.exists() {
        MonitorConfig::load(&args.config)?
    } else {
        warn!("Config file not found, using defaults");
        MonitorConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_cycle_interval(args.interval_secs)
        .with_stale_grace(args.grace_secs)
        .with_min_protocol_version(args.min_version);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Cycle interval: {}s", config.cycle_interval_secs);
    info!("   Stale grace window: {}s", config.stale_grace_secs);
    info!("   RPC timeout: {}s", config.rpc_timeout_secs);
    info!("   Minimum protocol version: {}", config.min_protocol_version);
    info!("   Gateways: {}", config.gateways.len());
    info!("   Relays: {}", config.relays.len());

    if config.gateways.is_empty() && config.relays.is_empty() {
        warn!("No gateways or relays configured; cycles will only sweep");
    }

    let shared_config = Arc::new(config);

    // Initialize peer registry
    let registry_path = args.data_dir.join("peer_registry");
    let registry = Arc::new(RwLock::new(PeerRegistry::open(&registry_path)?));
    info!("📦 Peer registry opened at {:?}", registry_path);

    // Start the observation scheduler
    let scheduler_handle = tokio::spawn(reconcile::run_scheduler(
        shared_config.clone(),
        registry.clone(),
    ));

    info!("✅ Observation scheduler started");
    info!("   Press Ctrl+C to shutdown gracefully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = scheduler_handle => {
            error!("Observation scheduler exited: {:?}", result);
        }
    }

    // Graceful shutdown: flush registry
    {
        let reg = registry.read().await;
        reg.flush()?;
        info!("📦 Peer registry flushed to disk");
    }

    info!("👋 Nodewatch shutting down");
    Ok(())
}
