//! The static-plus-mutable topology model: node (substation) and line
//! (cable) entities, and the construction routine that turns configuration
//! rows into a topology plus the corresponding solver-side model (spec
//! §3, §4.1).
//!
//! Field shapes follow the original `ActiveNode`/`Line` dataclasses: a
//! node or line carries its static configuration plus whatever the most
//! recent tick wrote into its mutable measurement fields.

use std::collections::{HashMap, VecDeque};

use crate::diagnostics::Diagnostics;
use crate::error::{GridError, GridResult};
use crate::solver::backend::PowerFlowBackend;
use crate::units::{Degrees, Kiloamperes, Kilovolts, Megavars, Megawatts, PerUnit};

/// One week at 15-minute resolution (spec §9 Design Notes).
pub const HISTORY_CAP: usize = 672;

/// The reserved key of the slack node. Always present, always active,
/// never carries a load.
pub const SLACK_KEY: u32 = 0;

/// Immutable cable class shared by every line built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct LineType {
    pub name: String,
    pub capacitance_nf_km: f64,
    pub resistance_ohm_km: f64,
    pub reactance_ohm_km: f64,
    pub max_current_ka: f64,
    pub cross_section_mm2: f64,
    pub temperature_coefficient: f64,
}

/// Raw per-phase telemetry carried on a node purely for display/diagnostics;
/// never fed to the solver.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseMeasurement {
    pub v_ab: f64,
    pub v_bc: f64,
    pub v_ca: f64,
    pub i_a: f64,
    pub i_b: f64,
    pub i_c: f64,
    pub power_factor: f64,
    pub cumulative_energy_kwh: f64,
}

/// A substation / bus in the network.
#[derive(Debug, Clone)]
pub struct Node {
    pub key: u32,
    pub name: String,
    pub nominal_mv_kv: Kilovolts,
    pub nominal_lv_kv: Kilovolts,
    pub rating_kva: f64,
    pub active: bool,
    pub is_transformer: bool,
    pub comment: Option<String>,

    pub voltage_pu: Option<PerUnit>,
    pub angle_deg: Option<Degrees>,
    pub p_mw: Option<Megawatts>,
    pub q_mvar: Option<Megavars>,
    pub online: bool,
    pub phase: Option<PhaseMeasurement>,
    pub history: VecDeque<(i64, Megawatts, Megavars)>,
}

impl Node {
    pub fn is_slack(&self) -> bool {
        self.key == SLACK_KEY
    }

    /// Append a valid `(P, Q)` observation, evicting the oldest entry once
    /// the cap (spec §9: one week at 15-minute resolution) is exceeded.
    pub fn push_history(&mut self, timestamp: i64, p: Megawatts, q: Megavars) {
        self.history.push_back((timestamp, p, q));
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }

    pub fn clear_tick_results(&mut self) {
        self.voltage_pu = None;
        self.angle_deg = None;
        self.p_mw = None;
        self.q_mvar = None;
        self.online = false;
    }
}

/// A cable between two named nodes.
#[derive(Debug, Clone)]
pub struct Line {
    pub key: u32,
    pub name: String,
    pub from_node: String,
    pub to_node: String,
    pub length_m: f64,
    pub cable_type: String,
    pub active: bool,
    pub comment: Option<String>,

    pub loading_percent: Option<f64>,
    pub i_from_ka: Option<Kiloamperes>,
    pub i_to_ka: Option<Kiloamperes>,
    pub p_from_mw: Option<Megawatts>,
    pub q_from_mvar: Option<Megavars>,
    pub p_to_mw: Option<Megawatts>,
    pub q_to_mvar: Option<Megavars>,
    pub pl_mw: Option<Megawatts>,
    pub ql_mvar: Option<Megavars>,
}

impl Line {
    pub fn clear_tick_results(&mut self) {
        self.loading_percent = None;
        self.i_from_ka = None;
        self.i_to_ka = None;
        self.p_from_mw = None;
        self.q_from_mvar = None;
        self.p_to_mw = None;
        self.q_to_mvar = None;
        self.pl_mw = None;
        self.ql_mvar = None;
    }
}

/// Raw configuration rows consumed by [`build_topology`]. Parsing these out
/// of CSV is `gridwatch-io`'s job; this module only consumes the
/// already-typed rows so it has no file-format dependency.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub key: u32,
    pub name: String,
    pub nominal_mv_kv: f64,
    pub nominal_lv_kv: f64,
    pub rating_kva: f64,
    pub active: bool,
    pub is_transformer: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LineConfig {
    pub key: u32,
    pub name: String,
    pub from_node: String,
    pub to_node: String,
    pub length_m: f64,
    pub cable_type: String,
    pub active: bool,
    pub comment: Option<String>,
}

/// A built network: node/line registries plus the total nameplate rating
/// the load assembler needs for residual allocation (spec §4.5).
pub struct Topology {
    pub nodes: HashMap<u32, Node>,
    pub names_by_key: HashMap<u32, String>,
    pub keys_by_name: HashMap<String, u32>,
    pub lines: Vec<Line>,
    pub line_types: HashMap<String, LineType>,
    pub total_rating_kva: f64,
}

impl Topology {
    pub fn node(&self, key: u32) -> Option<&Node> {
        self.nodes.get(&key)
    }

    pub fn node_mut(&mut self, key: u32) -> Option<&mut Node> {
        self.nodes.get_mut(&key)
    }

    pub fn node_key_by_name(&self, name: &str) -> Option<u32> {
        self.keys_by_name.get(name).copied()
    }

    pub fn non_slack_node_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self
            .nodes
            .keys()
            .copied()
            .filter(|&k| k != SLACK_KEY)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Read per-bus and per-line results back from the solver backend into
    /// the corresponding Node/Line entities (spec §4.6 "power-flow
    /// driver"). Only active lines are queried, matching the fact that
    /// inactive lines were never presented to the solver in the first
    /// place (spec §3 Line invariant).
    pub fn apply_results(&mut self, backend: &dyn PowerFlowBackend) {
        for node in self.nodes.values_mut() {
            if let Some(result) = backend.bus_result(node.key) {
                node.voltage_pu = Some(result.vm_pu);
                node.angle_deg = Some(result.va_deg);
                node.p_mw = Some(result.p_mw);
                node.q_mvar = Some(result.q_mvar);
            }
        }
        for line in self.lines.iter_mut() {
            if !line.active {
                continue;
            }
            if let Some(result) = backend.line_result(line.key) {
                line.loading_percent = Some(result.loading_percent);
                line.i_from_ka = Some(result.i_from_ka);
                line.i_to_ka = Some(result.i_to_ka);
                line.p_from_mw = Some(result.p_from_mw);
                line.q_from_mvar = Some(result.q_from_mvar);
                line.p_to_mw = Some(result.p_to_mw);
                line.q_to_mvar = Some(result.q_to_mvar);
                line.pl_mw = Some(result.pl_mw);
                line.ql_mvar = Some(result.ql_mvar);
            }
        }
    }
}

/// Fallback cable type substituted when a line names an unknown cable
/// class (spec §4.1).
fn fallback_line_type() -> LineType {
    LineType {
        name: "__fallback__".to_string(),
        capacitance_nf_km: 200.0,
        resistance_ohm_km: 0.32,
        reactance_ohm_km: 0.08,
        max_current_ka: 0.4,
        cross_section_mm2: 95.0,
        temperature_coefficient: 0.00393,
    }
}

/// Build a topology from configuration rows, registering cable types,
/// buses, lines, and the external-grid attachment on the solver backend as
/// it goes (spec §4.1).
pub fn build_topology(
    node_rows: Vec<NodeConfig>,
    line_rows: Vec<LineConfig>,
    cable_types: Vec<LineType>,
    backend: &mut dyn PowerFlowBackend,
) -> GridResult<(Topology, Diagnostics)> {
    let mut diagnostics = Diagnostics::new();
    let mut line_type_table = HashMap::new();
    for cable in cable_types {
        backend.register_cable_type(&cable)?;
        line_type_table.insert(cable.name.clone(), cable);
    }
    let fallback = fallback_line_type();
    backend.register_cable_type(&fallback)?;

    let mut nodes = HashMap::new();
    let mut names_by_key = HashMap::new();
    let mut keys_by_name = HashMap::new();

    let mut saw_slack = false;
    for row in node_rows {
        if keys_by_name.contains_key(&row.name) {
            return Err(GridError::ConfigInvalid(format!(
                "duplicate node name '{}'",
                row.name
            )));
        }
        if nodes.contains_key(&row.key) {
            return Err(GridError::ConfigInvalid(format!(
                "duplicate node key {}",
                row.key
            )));
        }
        if row.key == SLACK_KEY {
            saw_slack = true;
        }

        backend.create_bus(row.key, Kilovolts(row.nominal_mv_kv))?;
        if row.key == SLACK_KEY {
            backend.create_external_grid(row.key)?;
        }

        names_by_key.insert(row.key, row.name.clone());
        keys_by_name.insert(row.name.clone(), row.key);
        nodes.insert(
            row.key,
            Node {
                key: row.key,
                name: row.name,
                nominal_mv_kv: Kilovolts(row.nominal_mv_kv),
                nominal_lv_kv: Kilovolts(row.nominal_lv_kv),
                rating_kva: row.rating_kva,
                active: row.active,
                is_transformer: row.is_transformer,
                comment: row.comment,
                voltage_pu: None,
                angle_deg: None,
                p_mw: None,
                q_mvar: None,
                online: false,
                phase: None,
                history: VecDeque::new(),
            },
        );
    }

    if !saw_slack {
        backend.create_bus(SLACK_KEY, Kilovolts(11.0))?;
        backend.create_external_grid(SLACK_KEY)?;
        names_by_key.insert(SLACK_KEY, "SLACK".to_string());
        keys_by_name.insert("SLACK".to_string(), SLACK_KEY);
        nodes.insert(
            SLACK_KEY,
            Node {
                key: SLACK_KEY,
                name: "SLACK".to_string(),
                nominal_mv_kv: Kilovolts(11.0),
                nominal_lv_kv: Kilovolts(11.0),
                rating_kva: 0.0,
                active: true,
                is_transformer: false,
                comment: Some("injected slack (none present in configuration)".to_string()),
                voltage_pu: None,
                angle_deg: None,
                p_mw: None,
                q_mvar: None,
                online: true,
                phase: None,
                history: VecDeque::new(),
            },
        );
        diagnostics.add_warning("topology", "no slack node (key 0) in configuration; injected one");
    }

    let mut lines = Vec::with_capacity(line_rows.len());
    for row in line_rows {
        let from_key = *keys_by_name.get(&row.from_node).ok_or_else(|| {
            GridError::ConfigInvalid(format!(
                "line '{}' references unknown from-node '{}'",
                row.name, row.from_node
            ))
        })?;
        let to_key = *keys_by_name.get(&row.to_node).ok_or_else(|| {
            GridError::ConfigInvalid(format!(
                "line '{}' references unknown to-node '{}'",
                row.name, row.to_node
            ))
        })?;

        let mut effective_type = row.cable_type.clone();
        if !line_type_table.contains_key(&row.cable_type) {
            diagnostics.add_warning_with_entity(
                "topology",
                &format!("unknown cable type '{}', using fallback", row.cable_type),
                &row.name,
            );
            effective_type = fallback.name.clone();
        }

        if row.active {
            backend.create_line(
                row.key,
                &effective_type,
                from_key,
                to_key,
                row.length_m / 1000.0,
            )?;
        }

        lines.push(Line {
            key: row.key,
            name: row.name,
            from_node: row.from_node,
            to_node: row.to_node,
            length_m: row.length_m,
            cable_type: row.cable_type,
            active: row.active,
            comment: row.comment,
            loading_percent: None,
            i_from_ka: None,
            i_to_ka: None,
            p_from_mw: None,
            q_from_mvar: None,
            p_to_mw: None,
            q_to_mvar: None,
            pl_mw: None,
            ql_mvar: None,
        });
    }

    let total_rating_kva: f64 = nodes
        .values()
        .filter(|n| n.key != SLACK_KEY)
        .map(|n| n.rating_kva)
        .sum();

    Ok((
        Topology {
            nodes,
            names_by_key,
            keys_by_name,
            lines,
            line_types: line_type_table,
            total_rating_kva,
        },
        diagnostics,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::newton::NewtonRaphsonBackend;

    fn sample_cable() -> LineType {
        LineType {
            name: "XLPE-95".to_string(),
            capacitance_nf_km: 210.0,
            resistance_ohm_km: 0.32,
            reactance_ohm_km: 0.08,
            max_current_ka: 0.35,
            cross_section_mm2: 95.0,
            temperature_coefficient: 0.00393,
        }
    }

    #[test]
    fn builds_with_explicit_slack() {
        let mut backend = NewtonRaphsonBackend::new();
        let nodes = vec![
            NodeConfig {
                key: 0,
                name: "SLACK".into(),
                nominal_mv_kv: 11.0,
                nominal_lv_kv: 11.0,
                rating_kva: 0.0,
                active: true,
                is_transformer: false,
                comment: None,
            },
            NodeConfig {
                key: 1,
                name: "SUB-1".into(),
                nominal_mv_kv: 11.0,
                nominal_lv_kv: 0.4,
                rating_kva: 500.0,
                active: true,
                is_transformer: true,
                comment: None,
            },
        ];
        let lines = vec![LineConfig {
            key: 0,
            name: "L1".into(),
            from_node: "SLACK".into(),
            to_node: "SUB-1".into(),
            length_m: 500.0,
            cable_type: "XLPE-95".into(),
            active: true,
            comment: None,
        }];
        let (topo, diag) =
            build_topology(nodes, lines, vec![sample_cable()], &mut backend).unwrap();
        assert!(!diag.has_errors());
        assert_eq!(topo.nodes.len(), 2);
        assert_eq!(topo.total_rating_kva, 500.0);
    }

    #[test]
    fn injects_slack_when_absent() {
        let mut backend = NewtonRaphsonBackend::new();
        let nodes = vec![NodeConfig {
            key: 1,
            name: "SUB-1".into(),
            nominal_mv_kv: 11.0,
            nominal_lv_kv: 0.4,
            rating_kva: 500.0,
            active: true,
            is_transformer: true,
            comment: None,
        }];
        let (topo, diag) = build_topology(nodes, vec![], vec![sample_cable()], &mut backend).unwrap();
        assert!(topo.node(SLACK_KEY).is_some());
        assert_eq!(diag.warning_count(), 1);
    }

    #[test]
    fn unknown_cable_type_falls_back_with_warning() {
        let mut backend = NewtonRaphsonBackend::new();
        let nodes = vec![
            NodeConfig {
                key: 0,
                name: "SLACK".into(),
                nominal_mv_kv: 11.0,
                nominal_lv_kv: 11.0,
                rating_kva: 0.0,
                active: true,
                is_transformer: false,
                comment: None,
            },
            NodeConfig {
                key: 1,
                name: "SUB-1".into(),
                nominal_mv_kv: 11.0,
                nominal_lv_kv: 0.4,
                rating_kva: 500.0,
                active: true,
                is_transformer: true,
                comment: None,
            },
        ];
        let lines = vec![LineConfig {
            key: 0,
            name: "L1".into(),
            from_node: "SLACK".into(),
            to_node: "SUB-1".into(),
            length_m: 500.0,
            cable_type: "UNKNOWN-TYPE".into(),
            active: true,
            comment: None,
        }];
        let (_, diag) = build_topology(nodes, lines, vec![sample_cable()], &mut backend).unwrap();
        assert_eq!(diag.warning_count(), 1);
        assert!(diag.issues[0].message.contains("UNKNOWN-TYPE"));
    }

    #[test]
    fn unknown_endpoint_is_an_error() {
        let mut backend = NewtonRaphsonBackend::new();
        let nodes = vec![NodeConfig {
            key: 0,
            name: "SLACK".into(),
            nominal_mv_kv: 11.0,
            nominal_lv_kv: 11.0,
            rating_kva: 0.0,
            active: true,
            is_transformer: false,
            comment: None,
        }];
        let lines = vec![LineConfig {
            key: 0,
            name: "L1".into(),
            from_node: "SLACK".into(),
            to_node: "GHOST".into(),
            length_m: 500.0,
            cable_type: "XLPE-95".into(),
            active: true,
            comment: None,
        }];
        let result = build_topology(nodes, lines, vec![sample_cable()], &mut backend);
        assert!(result.is_err());
    }

    #[test]
    fn apply_results_populates_solved_nodes_and_lines() {
        let mut backend = NewtonRaphsonBackend::new();
        let nodes = vec![
            NodeConfig {
                key: 0,
                name: "SLACK".into(),
                nominal_mv_kv: 11.0,
                nominal_lv_kv: 11.0,
                rating_kva: 0.0,
                active: true,
                is_transformer: false,
                comment: None,
            },
            NodeConfig {
                key: 1,
                name: "SUB-1".into(),
                nominal_mv_kv: 11.0,
                nominal_lv_kv: 0.4,
                rating_kva: 500.0,
                active: true,
                is_transformer: true,
                comment: None,
            },
        ];
        let lines = vec![LineConfig {
            key: 0,
            name: "L1".into(),
            from_node: "SLACK".into(),
            to_node: "SUB-1".into(),
            length_m: 500.0,
            cable_type: "XLPE-95".into(),
            active: true,
            comment: None,
        }];
        let (mut topo, _diag) =
            build_topology(nodes, lines, vec![sample_cable()], &mut backend).unwrap();

        backend
            .create_load(1, Megawatts(0.1), Megavars(0.03), 1.0, "SUB-1")
            .unwrap();
        backend.run_power_flow().unwrap();
        topo.apply_results(&backend);

        assert!(topo.node(1).unwrap().voltage_pu.is_some());
        assert!(topo.node(1).unwrap().p_mw.is_some());
        assert!(topo.lines[0].loading_percent.is_some());
    }
}
