//! mcphub binary - the composition root.
//!
//! Wires the JSON config store, the connection manager, the health loop,
//! and the HTTP proxy together, then runs until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mcphub_conn::{ConnectionManager, DefaultTransportFactory, start_health_loop};
use mcphub_core::{AppEvent, AppEventEmitter, ConfigStore};

mod config_store;
mod logbuf;

use config_store::JsonConfigStore;
use logbuf::{CaptureLayer, RingLogSink};

/// Entries kept in the diagnostic ring buffer.
const LOG_BUFFER_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "mcphub", version, about = "MCP server connection manager and HTTP proxy")]
struct Cli {
    /// Config file path (default: platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Proxy port override for this run.
    #[arg(long)]
    port: Option<u16>,
}

/// Emitter that surfaces status batches in the log stream.
#[derive(Clone)]
struct LogEmitter;

impl AppEventEmitter for LogEmitter {
    fn emit(&self, event: AppEvent) {
        let AppEvent::StatusesChanged { statuses } = event;
        let connected = statuses.iter().filter(|s| s.state.is_connected()).count();
        debug!(total = statuses.len(), connected, "statuses changed");
    }

    fn clone_box(&self) -> Box<dyn AppEventEmitter> {
        Box::new(self.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_sink = Arc::new(RingLogSink::new(LOG_BUFFER_CAPACITY));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(CaptureLayer::new(Arc::clone(&log_sink) as _))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => JsonConfigStore::default_path()?,
    };
    let store = JsonConfigStore::new(config_path);
    info!("Using config at {}", store.path().display());

    let mut config = store.load()?;
    if let Some(port) = cli.port {
        config.proxy_port = port;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;
    let proxy_port = config.proxy_port;

    let manager = Arc::new(ConnectionManager::new(
        config,
        Arc::new(DefaultTransportFactory),
        Box::new(LogEmitter),
        Box::new(store),
    ));

    let listener = TcpListener::bind(("127.0.0.1", proxy_port)).await?;
    info!("Proxy binding to 127.0.0.1:{proxy_port}");

    manager.initialize().await;

    let cancel = CancellationToken::new();
    let health = start_health_loop(Arc::clone(&manager), cancel.clone());
    let proxy = tokio::spawn(mcphub_proxy::serve(
        listener,
        Arc::clone(&manager),
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel.cancel();
    manager.shutdown().await;
    if let Err(e) = health.await {
        error!("health loop join failed: {e}");
    }
    match proxy.await {
        Ok(result) => result?,
        Err(e) => error!("proxy task join failed: {e}"),
    }

    let buffered = log_sink.snapshot();
    if !buffered.is_empty() {
        debug!(entries = buffered.len(), "diagnostics captured this run");
    }
    info!("Goodbye");
    Ok(())
}
