//! vigild: the Vigil daemon.
//!
//! Single binary that assembles the monitor:
//! - State store (redb)
//! - Health poller
//! - Webhook delivery engine + event dispatcher
//! - Metrics endpoint
//!
//! # Usage
//!
//! ```text
//! vigild --config /etc/vigil/vigil.toml --data-dir /var/lib/vigil
//! ```

mod config;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vigil_health::HealthPoller;
use vigil_metrics::MetricsStore;
use vigil_state::StateStore;
use vigil_webhooks::{DeliveryEngine, EventDispatcher};

use crate::config::{VigilConfig, parse_nonzero_duration};

const DEFAULT_LOG_FILTER: &str = "info,vigild=debug,vigil=debug";

/// How long queued webhook deliveries may run after shutdown begins.
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the dispatcher gets to wind down once told to stop.
const DISPATCH_ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "vigild", about = "Vigil service health monitor")]
struct Cli {
    /// Path to vigil.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for persistent state.
    #[arg(long, default_value = "/var/lib/vigil")]
    data_dir: PathBuf,

    /// Poll interval, e.g. "30s". Overrides the config file.
    #[arg(long)]
    poll_interval: Option<String>,

    /// Port for the metrics endpoint. Overrides the config file.
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match &cli.config {
        Some(path) => VigilConfig::from_file(path)?,
        None => VigilConfig::default(),
    };

    run(cli, config).await
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli, config: VigilConfig) -> anyhow::Result<()> {
    info!("Vigil daemon starting");

    // ── State store ────────────────────────────────────────────

    std::fs::create_dir_all(&cli.data_dir)?;
    let db_path = cli.data_dir.join("vigil.redb");
    let state = Arc::new(StateStore::open(&db_path)?);
    info!(path = ?db_path, "state store opened");

    // ── Subsystems ─────────────────────────────────────────────

    let metrics = Arc::new(MetricsStore::new());

    let mut poller_config = config.poller_config()?;
    if let Some(raw) = &cli.poll_interval {
        poller_config.interval = parse_nonzero_duration("--poll-interval", raw)?;
    }
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let poller = HealthPoller::new(state.clone(), metrics.clone(), poller_config)?
        .with_events(events_tx);

    let engine = DeliveryEngine::new(state.clone(), state, config.delivery_config()?)?;
    info!(
        max_attempts = engine.config().retry.max_attempts,
        timeout_ms = engine.config().timeout.as_millis() as u64,
        disable_after_failures = ?engine.config().disable_after_failures,
        "webhook delivery configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut dispatcher_handle =
        tokio::spawn(EventDispatcher::new(engine.clone()).run(events_rx, shutdown_rx));

    // ── Metrics server ─────────────────────────────────────────

    let port = cli.metrics_port.unwrap_or_else(|| config.metrics_port());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");

    poller.initialize(None).await;

    let router = server::build_router(metrics);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    // ── Shutdown ───────────────────────────────────────────────

    // Dropping the poller closes the event queue once its loop exits,
    // which lets the dispatcher drain and return.
    poller.stop();
    drop(poller);

    if tokio::time::timeout(DISPATCH_DRAIN_TIMEOUT, &mut dispatcher_handle)
        .await
        .is_err()
    {
        warn!("webhook deliveries still pending; stopping dispatcher");
        let _ = shutdown_tx.send(true);
        if tokio::time::timeout(DISPATCH_ABORT_GRACE, &mut dispatcher_handle)
            .await
            .is_err()
        {
            // Dropping the dispatcher's JoinSet aborts its workers.
            dispatcher_handle.abort();
        }
    }

    let stats = engine.get_stats();
    info!(
        total = stats.total_deliveries,
        successful = stats.successful_deliveries,
        failed = stats.failed_deliveries,
        retries = stats.retries,
        "Vigil daemon stopped"
    );
    Ok(())
}
