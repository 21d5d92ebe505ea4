//! Shockline - Highway Shockwave Intelligence
//!
//! Real-time detection of traffic shockwaves from fused highway sensor
//! feeds, with downstream arrival prediction over the station graph.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (shockline.toml if present)
//! cargo run --release
//!
//! # Explicit config file
//! cargo run --release -- --config /etc/shockline.toml
//!
//! # Single cycle (useful for cron-style operation and smoke tests)
//! cargo run --release -- --once
//! ```
//!
//! # Environment Variables
//!
//! - `SHOCKLINE_CONFIG`: Path to the TOML config file
//! - `SHOCKLINE_CLIENT_ID` / `SHOCKLINE_CLIENT_SECRET`: live feed credentials
//!   (unset disables the live connector; the archive feed still runs)
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shockline::config;
use shockline::connectors::{HistoricalConnector, LiveConnector, SnapshotSource};
use shockline::detection::ShockDetector;
use shockline::fusion::FusionCache;
use shockline::output::OutputWriter;
use shockline::pipeline::{Orchestrator, PipelineState};
use shockline::propagation::PropagationPredictor;
use shockline::topology::{DistanceGraph, StationRegistry};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "shockline")]
#[command(about = "Highway shockwave detection and propagation forecasting")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides SHOCKLINE_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single pipeline cycle and exit
    #[arg(long)]
    once: bool,

    /// Skip the historical backfill on startup
    #[arg(long)]
    no_bootstrap: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let system_config = match &args.config {
        Some(path) => config::SystemConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => config::SystemConfig::load().context("loading config")?,
    };
    config::init(system_config);
    let cfg = config::get();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Shockline - Highway Shockwave Intelligence");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Topology is read-only after this point.
    let registry = Arc::new(
        StationRegistry::load(&cfg.topology.registry_path)
            .with_context(|| format!("loading stations from {}", cfg.topology.registry_path.display()))?,
    );
    let graph = Arc::new(
        DistanceGraph::load(&cfg.topology.distance_path)
            .with_context(|| format!("loading distances from {}", cfg.topology.distance_path.display()))?,
    );
    info!(
        stations = registry.len(),
        graph_nodes = graph.node_count(),
        "Topology loaded"
    );

    let historical = Arc::new(HistoricalConnector::new(
        cfg.historical_feed.clone(),
        Arc::clone(&registry),
    ));
    let mut sources: Vec<Arc<dyn SnapshotSource>> = Vec::new();
    if cfg.live_feed.enabled() {
        info!("Live feed: enabled");
        sources.push(Arc::new(LiveConnector::new(
            cfg.live_feed.clone(),
            Arc::clone(&registry),
        )));
    } else {
        warn!("Live feed: no credentials configured, running archive-only");
    }
    sources.push(Arc::clone(&historical) as Arc<dyn SnapshotSource>);

    // Graceful shutdown via Ctrl+C.
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut cache = FusionCache::new(&cfg.cache, sources);
    if !args.no_bootstrap {
        match historical.fetch_window(cfg.cache.window_minutes, &cancel_token).await {
            Ok(readings) => {
                let ingested = cache.bootstrap(readings);
                info!(ingested, "Historical backfill complete");
            }
            Err(e) => warn!(error = %e, "Historical backfill unavailable, starting cold"),
        }
    }

    let state = Arc::new(RwLock::new(PipelineState::default()));
    let orchestrator = Orchestrator::new(
        cfg.orchestrator.clone(),
        cache,
        ShockDetector::new(cfg.detection.clone()),
        PropagationPredictor::new(cfg.propagation.clone(), registry, graph),
        OutputWriter::new(&cfg.output).context("preparing output directory")?,
        Arc::clone(&state),
        cancel_token.clone(),
    );

    if args.once {
        let mut orchestrator = orchestrator;
        orchestrator.run_cycle().await;
        let state = state.read().await;
        info!(
            events = state.active_shock_events().len(),
            predictions = state.propagation_predictions(None).len(),
            "Single cycle complete"
        );
        return Ok(());
    }

    let mut tasks: JoinSet<()> = JoinSet::new();
    tasks.spawn(orchestrator.run());

    // Wait for the orchestrator (or cancellation) and drain cleanly.
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Pipeline task panicked");
            cancel_token.cancel();
        }
    }

    info!("Shockline shutdown complete");
    Ok(())
}
