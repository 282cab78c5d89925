//! The per-subscriber tick orchestrator (spec §4.8): owns one topology, one
//! solver instance, and one reading source, and drives them through the
//! assemble → solve → emit pipeline at a fixed cadence until the subscriber
//! disconnects or an unrecoverable error occurs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gridwatch_assembly::{assemble_tick, AssemblyOptions};
use gridwatch_core::diagnostics::Diagnostics;
use gridwatch_core::prediction::PredictionModel;
use gridwatch_core::solver::registry::SolverKind;
use gridwatch_core::topology::{build_topology, LineConfig, LineType, NodeConfig, Topology};
use gridwatch_core::{GridError, GridResult};
use gridwatch_emit::{Snapshot, SiteTotalsSnapshot, SnapshotSink};
use gridwatch_io::reading_source::{Reading, ReadingSource, SiteTotals};
use gridwatch_reliability::gilbert_elliott::GilbertElliottSimulator;
use tokio::sync::watch;
use tracing::{info, warn};

/// Wall-clock tick period beyond which a slow tick is logged (spec §4.6,
/// lifted directly from `server/main.py`'s `exec_time > 0.7` check).
const SLOW_TICK_THRESHOLD: Duration = Duration::from_millis(700);

/// Static configuration an orchestrator needs to build its own topology and
/// drive its own pipeline. Cheap to clone: the CSV rows are parsed once by
/// the caller and handed to every subscriber's orchestrator.
#[derive(Clone)]
pub struct OrchestratorConfig {
    pub db_path: String,
    pub start_time: String,
    pub node_rows: Vec<NodeConfig>,
    pub line_rows: Vec<LineConfig>,
    pub cable_types: Vec<LineType>,
    pub solver: SolverKind,
    pub options: AssemblyOptions,
    pub target_period: Duration,
    /// Name of the single prediction model this orchestrator's assembler
    /// should query for every node's undelivered reading. There is one
    /// currently-selected model per spec §4.5, not a per-node assignment;
    /// the same `Arc` is installed under every non-slack node key so the
    /// load assembler's per-node lookup (keyed the way the original's
    /// per-device plugin dispatch was) finds it uniformly.
    pub model_name: Option<String>,
}

/// Drives one subscriber's tick pipeline until cancelled or until an
/// unrecoverable error terminates it (spec §4.8, §5).
pub struct TickOrchestrator<S: SnapshotSink> {
    config: OrchestratorConfig,
    topology: Topology,
    backend: Box<dyn gridwatch_core::solver::backend::PowerFlowBackend>,
    link_simulators: HashMap<u32, GilbertElliottSimulator>,
    plugin_host: Arc<gridwatch_plugins::PluginHost>,
    sink: S,
    cancel: watch::Receiver<bool>,
    last_snapshot: Option<Snapshot>,
}

impl<S: SnapshotSink> TickOrchestrator<S> {
    /// Builds the topology once (spec §4.8 "build the topology once") and
    /// seeds one Gilbert-Elliott simulator per non-slack node, deterministic
    /// on the node key (spec §4.3).
    pub fn new(
        config: OrchestratorConfig,
        plugin_host: Arc<gridwatch_plugins::PluginHost>,
        sink: S,
        cancel: watch::Receiver<bool>,
    ) -> GridResult<(Self, Diagnostics)> {
        let mut backend = config.solver.build();
        let (topology, diagnostics) = build_topology(
            config.node_rows.clone(),
            config.line_rows.clone(),
            config.cable_types.clone(),
            backend.as_mut(),
        )?;

        let link_simulators = topology
            .non_slack_node_keys()
            .into_iter()
            .map(|key| (key, GilbertElliottSimulator::with_default_params(key)))
            .collect();

        let orchestrator = TickOrchestrator {
            config,
            topology,
            backend,
            link_simulators,
            plugin_host,
            sink,
            cancel,
            last_snapshot: None,
        };
        Ok((orchestrator, diagnostics))
    }

    /// Builds the `node key -> model` map the load assembler expects, from
    /// the single currently-selected model (spec §4.5). Returns an empty map
    /// when no model is configured or the named model is not presently
    /// loaded, in which case every undelivered reading falls straight
    /// through to residual allocation (spec §4.5 edge case).
    fn current_models(&self) -> HashMap<u32, Arc<dyn PredictionModel>> {
        let Some(name) = self.config.model_name.as_deref() else {
            return HashMap::new();
        };
        let Some(model) = self.plugin_host.model_by_name(name) else {
            return HashMap::new();
        };
        self.topology
            .non_slack_node_keys()
            .into_iter()
            .map(|key| (key, Arc::clone(&model)))
            .collect()
    }

    /// Runs the open-reading-source, build-topology-once, tick-forever loop
    /// described by spec §4.8 until the source is exhausted, the subscriber
    /// disconnects, the cancellation signal fires, or an unrecoverable error
    /// is hit.
    pub async fn run(mut self) -> GridResult<()> {
        let mut source = ReadingSource::open(&self.config.db_path, &self.config.start_time)?;

        loop {
            if *self.cancel.borrow() {
                info!("orchestrator cancelled, stopping");
                return Ok(());
            }

            let (returned_source, next) = Self::fetch_next(source).await;
            source = returned_source;
            let Some(batch) = next else {
                info!("reading source exhausted, orchestrator finished");
                return Ok(());
            };
            let (site_totals, readings) = batch?;

            let tick_started = Instant::now();
            self.run_one_tick(&site_totals, &readings).await?;
            let elapsed = tick_started.elapsed();
            if elapsed > SLOW_TICK_THRESHOLD {
                warn!(?elapsed, "tick exceeded slow-tick threshold");
            }

            let applied = self.plugin_host.process_events();
            if applied > 0 {
                info!(applied, "applied plugin hot-reload events");
            }

            let sleep_for = self.config.target_period.saturating_sub(elapsed);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.cancel.changed() => {
                    if *self.cancel.borrow() {
                        info!("orchestrator cancelled during sleep, stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Moves a blocking `ReadingSource` into a `spawn_blocking` task, pulls
    /// one batch, and hands ownership back — the idiom for threading a
    /// non-`async` iterator through an async loop without holding it across
    /// an await point on the runtime's worker threads (spec §5 "suspension
    /// points").
    async fn fetch_next(
        mut source: ReadingSource,
    ) -> (
        ReadingSource,
        Option<GridResult<(SiteTotals, Vec<Reading>)>>,
    ) {
        tokio::task::spawn_blocking(move || {
            let item = source.next();
            (source, item)
        })
        .await
        .expect("reading source task panicked")
    }

    /// Runs the assembly → solve → topology-mutation → emit sequence for a
    /// single batch (spec §4.5, §4.6, §4.7).
    async fn run_one_tick(&mut self, site_totals: &SiteTotals, readings: &[Reading]) -> GridResult<()> {
        let models = self.current_models();

        assemble_tick(
            &mut self.topology,
            self.backend.as_mut(),
            readings,
            site_totals,
            self.config.options,
            &mut self.link_simulators,
            &models,
        )?;

        let report = self.backend.run_power_flow()?;
        let totals_snapshot = SiteTotalsSnapshot {
            timestamp: site_totals.timestamp_unix,
            active_kw: site_totals.total_active_mw * 1000.0,
            reactive_kvar: site_totals.total_reactive_mvar * 1000.0,
        };

        let snapshot = if report.converged {
            self.topology.apply_results(self.backend.as_ref());
            let snapshot = Snapshot::from_topology(&self.topology, totals_snapshot, false);
            self.last_snapshot = Some(snapshot.clone());
            snapshot
        } else {
            warn!(
                iterations = report.iterations,
                max_mismatch = report.max_mismatch,
                "power flow did not converge, re-emitting last snapshot"
            );
            match &self.last_snapshot {
                Some(previous) => {
                    let mut diverged = previous.clone();
                    diverged.diverged = true;
                    diverged
                }
                None => Snapshot::from_topology(&self.topology, totals_snapshot, true),
            }
        };

        self.sink
            .send(&snapshot)
            .await
            .map_err(|e| GridError::Other(e.to_string()))
    }
}
