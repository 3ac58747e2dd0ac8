//! front-proxy
//!
//! ```text
//!  browser ──▶ listener ──▶ dispatcher ──CONNECT──▶ TLS interception ─┐
//!                              ▲                                      │
//!                              └──────────── promoted connection ◀────┘
//!                              │
//!                              ▼
//!                      routing engine ──▶ LOCAL   → loopback client
//!                                     ──▶ SELF_CHECK → literal "OK"
//!                                     ──▶ DIRECT  → TLS to destination
//!                                     ──▶ AGENT   → upstream tunnel backend
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use front_proxy::config::loader::load_config;
use front_proxy::config::watcher::ConfigWatcher;
use front_proxy::config::ProxyConfig;
use front_proxy::lifecycle::{build_server, Shutdown};
use front_proxy::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "front-proxy", version, about = "Local routing proxy with TLS interception")]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Reload routing rules when the config file changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "front-proxy starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        cert_dir = %config.certs.dir,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        _ => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = build_server(config)?;
    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
