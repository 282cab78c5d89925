//! `gridwatchd`: accepts subscriber connections over a WebSocket endpoint
//! and spawns one [`TickOrchestrator`] per connection (spec §4.8, §6
//! "Subscriber transport"). Configuration files and the prediction-plugin
//! directory are read once at startup; the plugin host's watcher then
//! runs independently of every orchestrator (spec §5).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use gridwatch_assembly::AssemblyOptions;
use gridwatch_core::solver::registry::SolverKind;
use gridwatch_emit::WebSocketSink;
use gridwatch_orchestrator::{OrchestratorConfig, TickOrchestrator};
use gridwatch_plugins::{PluginHost, PluginHostConfig};

/// `gridwatchd` — real-time electrical-network state estimator and
/// snapshot broadcaster.
#[derive(Parser, Debug, Clone)]
#[command(name = "gridwatchd", version, about)]
struct Args {
    /// Path to the SQLite reading store (spec §4.2/§6).
    #[arg(long)]
    readings_db: PathBuf,

    /// Earliest timestamp (inclusive) to stream, e.g. "2024-01-01 00:00:00".
    #[arg(long, default_value = "1970-01-01 00:00:00")]
    start_time: String,

    /// Node configuration CSV (spec §6 "nodes").
    #[arg(long)]
    nodes_csv: PathBuf,

    /// Line configuration CSV (spec §6 "links").
    #[arg(long)]
    lines_csv: PathBuf,

    /// Cable-type configuration CSV (spec §6 "cables").
    #[arg(long)]
    cables_csv: PathBuf,

    /// Directory scanned for prediction-model plugin units (spec §4.4).
    #[arg(long)]
    plugin_dir: PathBuf,

    /// Scratch directory used for staging hot-reloaded plugin copies.
    #[arg(long, default_value = "./gridwatch-plugin-scratch")]
    plugin_scratch_dir: PathBuf,

    /// Address to accept subscriber WebSocket connections on.
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,

    /// Target tick period in milliseconds (spec §4.8 cadence).
    #[arg(long, default_value_t = 1000)]
    tick_period_ms: u64,

    /// Power-flow backend to use (spec §6 "Solver interface").
    #[arg(long, default_value = "newton")]
    solver: String,

    /// Name of the currently-selected prediction model for undelivered
    /// readings (spec §4.5). Must match a unit discovered under
    /// `--plugin-dir`; omit to fall through to residual allocation only.
    #[arg(long)]
    model: Option<String>,

    /// Enable the link-reliability simulator (spec §4.3).
    #[arg(long, default_value_t = false)]
    simulate_network: bool,

    /// Force simulated drops to residual allocation instead of prediction
    /// (spec §4.5 step 2b).
    #[arg(long, default_value_t = false)]
    batch_allocate: bool,
}

struct AppState {
    config: OrchestratorConfig,
    plugin_host: Arc<PluginHost>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let node_rows = gridwatch_io::config::load_nodes(&args.nodes_csv)
        .with_context(|| format!("loading nodes CSV {:?}", args.nodes_csv))?;
    let line_rows = gridwatch_io::config::load_lines(&args.lines_csv)
        .with_context(|| format!("loading lines CSV {:?}", args.lines_csv))?;
    let cable_types = gridwatch_io::config::load_cable_types(&args.cables_csv)
        .with_context(|| format!("loading cables CSV {:?}", args.cables_csv))?;

    let solver: SolverKind = args.solver.parse()?;

    let mut plugin_host = PluginHost::new(PluginHostConfig::new(
        args.plugin_dir.clone(),
        args.plugin_scratch_dir.clone(),
    ));
    plugin_host.load_all();
    plugin_host.spawn_watcher();
    let plugin_host = Arc::new(plugin_host);

    let config = OrchestratorConfig {
        db_path: args.readings_db.to_string_lossy().into_owned(),
        start_time: args.start_time.clone(),
        node_rows,
        line_rows,
        cable_types,
        solver,
        options: AssemblyOptions {
            simulate_network: args.simulate_network,
            batch_allocate: args.batch_allocate,
        },
        target_period: Duration::from_millis(args.tick_period_ms),
        model_name: args.model.clone(),
    };

    let state = Arc::new(AppState {
        config,
        plugin_host,
    });

    let app = Router::new()
        .route("/snapshots", get(accept_subscriber))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding listen address {}", args.listen))?;
    info!(addr = %args.listen, "gridwatchd listening for subscribers");

    axum::serve(listener, app)
        .await
        .context("serving subscriber connections")
}

async fn accept_subscriber(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let sink = WebSocketSink::new(socket);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let build = TickOrchestrator::new(
            state.config.clone(),
            Arc::clone(&state.plugin_host),
            sink,
            cancel_rx,
        );

        let (orchestrator, diagnostics) = match build {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to build orchestrator for subscriber");
                return;
            }
        };
        for issue in &diagnostics.issues {
            warn!(%issue, "topology construction diagnostic");
        }

        if let Err(e) = orchestrator.run().await {
            warn!(error = %e, "orchestrator terminated");
        }
    })
}
