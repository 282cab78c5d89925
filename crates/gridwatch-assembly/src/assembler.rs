//! Per-tick load assembler (spec §4.5), condensed from `server/main.py`'s
//! inline loop into a reusable function with its two bugs fixed:
//!
//! 1. The residual loop's `q_mvar` argument used the last reading-loop
//!    iteration's stale `q` local instead of the computed residual `Q`.
//! 2. The residual loop's `p_mw` argument used `remaining_q` (the residual
//!    *reactive* power) instead of `remaining_p`, and did not weight the
//!    analogous `q_mvar` argument by rating at all.
//!
//! The corrected algorithm rating-weights both `P` and `Q` residual terms
//! identically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gridwatch_core::error::GridResult;
use gridwatch_core::prediction::PredictionModel;
use gridwatch_core::solver::backend::PowerFlowBackend;
use gridwatch_core::topology::{PhaseMeasurement, Topology, SLACK_KEY};
use gridwatch_core::units::{Megavars, Megawatts};
use gridwatch_io::reading_source::{Reading, SiteTotals};
use gridwatch_reliability::GilbertElliottSimulator;

/// The scaling factor `pp.create_load`'s `scaling=` argument carries in the
/// original; there is no per-deployment override surface for it, matching
/// `GLOBAL_SCALING_FACTOR = 1` in `server/main.py`.
pub const GLOBAL_SCALING_FACTOR: f64 = 1.0;

/// Flags controlling a single tick's assembly behaviour (spec §4.5 input).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyOptions {
    /// When set, a dropped/unreliable link falls through to the
    /// prediction model (and is recorded into node history) instead of
    /// using the raw reading directly.
    pub simulate_network: bool,
    /// When set, a simulated drop's prediction is discarded in favour of
    /// `(0, 0)` so the residual pool (not the model) fills the gap.
    pub batch_allocate: bool,
}

/// Outcome of assembling one tick's loads, reported back to the tick
/// orchestrator for logging/diagnostics.
#[derive(Debug, Clone, Default)]
pub struct AssemblyReport {
    pub delivered: Vec<u32>,
    pub simulated: Vec<u32>,
    pub allocated_p_mw: f64,
    pub allocated_q_mvar: f64,
}

/// Assemble one tick's loads onto the solver backend (spec §4.5).
///
/// `link_simulators` and `models` are keyed by node key; both are optional
/// per node (a node with no simulator is treated as never dropping, a node
/// with no model always falls through to residual allocation on a drop).
pub fn assemble_tick(
    topology: &mut Topology,
    backend: &mut dyn PowerFlowBackend,
    readings: &[Reading],
    site_totals: &SiteTotals,
    options: AssemblyOptions,
    link_simulators: &mut HashMap<u32, GilbertElliottSimulator>,
    models: &HashMap<u32, Arc<dyn PredictionModel>>,
) -> GridResult<AssemblyReport> {
    let mut allocated_p = 0.0_f64;
    let mut allocated_q = 0.0_f64;
    let mut remaining_rating = topology.total_rating_kva;
    let mut delivered: HashSet<u32> = HashSet::new();

    for node in topology.nodes.values_mut() {
        node.clear_tick_results();
    }

    for reading in readings {
        let Some((raw_p, raw_q)) = reading.power_active.zip(reading.power_reactive) else {
            continue;
        };
        if !raw_p.is_finite() || !raw_q.is_finite() {
            continue;
        }

        let key = reading.device_key;
        let Some(node) = topology.nodes.get_mut(&key) else {
            continue;
        };

        let reading_p_mw = raw_p / 1000.0;
        let reading_q_mvar = raw_q / 1000.0;

        let dropped = options.simulate_network
            && link_simulators
                .get_mut(&key)
                .map(|sim| sim.decide_drop())
                .unwrap_or(false);

        let (p_mw, q_mvar) = if dropped {
            let history: Vec<_> = node
                .history
                .iter()
                .map(|(ts, p, q)| (*ts, *p, *q))
                .collect();
            let predicted = models.get(&key).and_then(|m| m.predict_next(&history));
            match predicted {
                Some(pred) if options.batch_allocate => {
                    let _ = pred;
                    (0.0, 0.0)
                }
                Some(pred) => (pred.p_mw.0, pred.q_mvar.0),
                None => (0.0, 0.0),
            }
        } else {
            (reading_p_mw, reading_q_mvar)
        };

        if !dropped && options.simulate_network {
            node.push_history(
                site_totals.timestamp_unix,
                Megawatts(reading_p_mw),
                Megavars(reading_q_mvar),
            );
        }

        node.phase = Some(PhaseMeasurement {
            v_ab: reading.voltage_ab.unwrap_or_default(),
            v_bc: reading.voltage_bc.unwrap_or_default(),
            v_ca: reading.voltage_ca.unwrap_or_default(),
            i_a: reading.current_a.unwrap_or_default(),
            i_b: reading.current_b.unwrap_or_default(),
            i_c: reading.current_c.unwrap_or_default(),
            power_factor: reading.power_factor.unwrap_or_default(),
            cumulative_energy_kwh: reading.cumulative_active_energy.unwrap_or_default(),
        });

        delivered.insert(key);
        allocated_p += p_mw;
        allocated_q += q_mvar;
        remaining_rating -= node.rating_kva;
        node.online = true;

        backend.create_load(
            key,
            Megawatts(p_mw),
            Megavars(q_mvar),
            GLOBAL_SCALING_FACTOR,
            &node.name,
        )?;
    }

    let residual_p = site_totals.total_active_mw - allocated_p;
    let residual_q = site_totals.total_reactive_mvar - allocated_q;

    let mut simulated = Vec::new();
    let non_slack_keys = topology.non_slack_node_keys();
    for key in non_slack_keys {
        if delivered.contains(&key) {
            continue;
        }
        let node = topology.nodes.get_mut(&key).expect("key from non_slack_node_keys");

        let (p_mw, q_mvar) = if remaining_rating <= 0.0 {
            let undelivered_count = topology
                .non_slack_node_keys()
                .iter()
                .filter(|k| !delivered.contains(k))
                .count()
                .max(1) as f64;
            (residual_p / undelivered_count, residual_q / undelivered_count)
        } else {
            let weight = node.rating_kva / remaining_rating;
            (residual_p * weight, residual_q * weight)
        };

        node.online = false;
        simulated.push(key);

        backend.create_load(
            key,
            Megawatts(p_mw),
            Megavars(q_mvar),
            GLOBAL_SCALING_FACTOR,
            &node.name,
        )?;
    }

    debug_assert!(!delivered.contains(&SLACK_KEY));

    Ok(AssemblyReport {
        delivered: delivered.into_iter().collect(),
        simulated,
        allocated_p_mw: allocated_p,
        allocated_q_mvar: allocated_q,
    })
}
