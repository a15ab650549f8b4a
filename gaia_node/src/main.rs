//! # GAIA Node Binary
//!
//! Edge controller core: pub/sub transport, periodic measurement,
//! actuator command execution and the emergency-stop lifecycle.
//!
//! # Usage
//!
//! ```bash
//! # Run against the simulation board (development default)
//! gaia_node --config config/node.toml --sim
//!
//! # Verbose logging
//! gaia_node -c config/node.toml -s -v
//! ```

#![deny(warnings)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use gaia_common::clock::SystemClock;
use gaia_common::config::{ConfigError, NodeConfig};
use gaia_common::consts::PROCESSING_TIMEOUT_MS;
use gaia_hal::board::Board;
use gaia_hal::profile::ESP32;
use gaia_hal::sim::SimBoard;
use gaia_node::node::Node;
use gaia_node::sensor::processing::TcpProcessingClient;
use gaia_node::storage::{FileBackend, Storage};
use gaia_node::system::{ShutdownRequest, node_id_from_mac};
use gaia_node::transport::link::RumqttcLink;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// GAIA edge node core
#[derive(Parser, Debug)]
#[command(name = "gaia_node")]
#[command(author = "Automation One")]
#[command(version)]
#[command(about = "GAIA edge controller node core")]
#[command(long_about = None)]
struct Args {
    /// Path to the node configuration file (node.toml)
    #[arg(short, long, default_value = "config/node.toml")]
    config: PathBuf,

    /// Use the simulation board backend
    #[arg(short = 's', long)]
    sim: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("node startup failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match NodeConfig::load(&args.config) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound) => {
            // Logging is not up yet; note it after setup below.
            NodeConfig::default()
        }
        Err(e) => return Err(e.into()),
    };

    setup_tracing(&args, &config);
    info!("GAIA node core v{} starting...", env!("CARGO_PKG_VERSION"));
    if !args.config.exists() {
        warn!(path = %args.config.display(), "config file missing, using defaults");
    }

    // The simulation backend is the only board shipped with the core;
    // hardware backends plug in behind the same trait.
    if !args.sim {
        warn!("no hardware backend selected, falling back to the simulation board");
    }
    let board = SimBoard::new();
    let node_id = node_id_from_mac(board.mac_address());

    let storage = Storage::new(Box::new(FileBackend::new(&config.storage.dir)));
    let link = RumqttcLink::new(
        &node_id,
        &config.broker.host,
        config.broker.port,
        config.broker.keep_alive_s,
        match (&config.broker.username, &config.broker.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        },
    );
    let timeout_ms = if config.processing.timeout_ms == 0 {
        PROCESSING_TIMEOUT_MS
    } else {
        config.processing.timeout_ms
    };
    let processing = TcpProcessingClient::new(
        &config.processing.host,
        config.processing.port,
        timeout_ms,
    );

    let mut node = Node::new(
        Box::new(SystemClock::new()),
        Box::new(board),
        ESP32.clone(),
        storage,
        Box::new(link),
        Box::new(processing),
        &config.timing,
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            info!("shutdown signal received");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    node.run(&running);

    match node.shutdown_requested() {
        Some(ShutdownRequest::FactoryReset) => {
            info!("factory reset complete; exiting for reboot into provisioning")
        }
        Some(ShutdownRequest::Restart) => info!("restart requested; exiting"),
        None => info!("shutdown complete"),
    }
    Ok(())
}

fn setup_tracing(args: &Args, config: &NodeConfig) {
    let default = if args.verbose {
        "debug"
    } else {
        config.shared.log_level.as_filter()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
