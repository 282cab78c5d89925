//! The per-tick snapshot payload (spec §4.7), grounded on
//! `original_source/server/network.py`'s `Line.serialise()` /
//! `ActiveNode.serialise()`: exact field names and the `assure_float`
//! null-to-zero substitution, plus the `diverged` flag spec §4.6 requires
//! on the top-level payload (restored here; the distilled §4.7 field list
//! omits it by oversight).

use serde::Serialize;

use gridwatch_core::topology::{Line, Node, Topology};

/// One line's serialised fields (spec §4.7).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LineSnapshot {
    pub key: String,
    pub name: String,
    pub length: f64,
    #[serde(rename = "type")]
    pub cable_type: String,
    pub loading: f64,
    pub current: f64,
}

impl LineSnapshot {
    pub fn from_line(line: &Line) -> LineSnapshot {
        LineSnapshot {
            key: line.key.to_string(),
            name: line.name.clone(),
            length: line.length_m,
            cable_type: line.cable_type.clone(),
            loading: line.loading_percent.unwrap_or(0.0),
            current: line.i_from_ka.map(|i| i.to_amperes()).unwrap_or(0.0),
        }
    }
}

/// One node's serialised fields (spec §4.7).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeSnapshot {
    pub key: String,
    pub name: String,
    pub rating: f64,
    pub voltage: f64,
    pub p_kw: f64,
    pub q_kvar: f64,
    pub phase: f64,
    pub online: bool,
}

impl NodeSnapshot {
    pub fn from_node(node: &Node) -> NodeSnapshot {
        let voltage = node
            .voltage_pu
            .map(|vm| vm.value() * node.nominal_mv_kv.value())
            .unwrap_or(0.0);
        NodeSnapshot {
            key: node.key.to_string(),
            name: node.name.clone(),
            rating: node.rating_kva,
            voltage,
            p_kw: node.p_mw.map(|p| p.value() * 1000.0).unwrap_or(0.0),
            q_kvar: node.q_mvar.map(|q| q.value() * 1000.0).unwrap_or(0.0),
            phase: node.angle_deg.map(|a| a.value()).unwrap_or(0.0),
            online: node.online,
        }
    }
}

/// Site-wide aggregate, carried through unchanged from the reading
/// source's `SiteTotals` (spec §4.7 `site_totals` object).
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct SiteTotalsSnapshot {
    pub timestamp: i64,
    pub active_kw: f64,
    pub reactive_kvar: f64,
}

/// The full per-tick payload pushed to every subscriber (spec §4.7).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Snapshot {
    pub line_data: Vec<LineSnapshot>,
    pub node_data: Vec<NodeSnapshot>,
    pub site_totals: SiteTotalsSnapshot,
    /// Set when this tick's solve did not converge (spec §4.6): the
    /// per-entity fields reflect the last successful snapshot, not a
    /// fresh solve.
    pub diverged: bool,
}

impl Snapshot {
    /// Build a snapshot from the current topology state (spec §4.7:
    /// "only active lines are presented"... but the snapshot itself lists
    /// every line/node entity for display, active or not — only *solver*
    /// presentation is restricted to active lines, per §3's Line
    /// invariant "Only active lines are presented to the solver").
    pub fn from_topology(
        topology: &Topology,
        site_totals: SiteTotalsSnapshot,
        diverged: bool,
    ) -> Snapshot {
        let mut node_data: Vec<NodeSnapshot> = topology.nodes.values().map(NodeSnapshot::from_node).collect();
        node_data.sort_by(|a, b| a.key.cmp(&b.key));

        let line_data: Vec<LineSnapshot> = topology.lines.iter().map(LineSnapshot::from_line).collect();

        Snapshot {
            line_data,
            node_data,
            site_totals,
            diverged,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwatch_core::solver::newton::NewtonRaphsonBackend;
    use gridwatch_core::topology::{build_topology, LineConfig, LineType, NodeConfig};

    fn sample_topology() -> Topology {
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
        let cable = LineType {
            name: "XLPE-95".into(),
            capacitance_nf_km: 210.0,
            resistance_ohm_km: 0.32,
            reactance_ohm_km: 0.08,
            max_current_ka: 0.35,
            cross_section_mm2: 95.0,
            temperature_coefficient: 0.00393,
        };
        build_topology(nodes, lines, vec![cable], &mut backend).unwrap().0
    }

    #[test]
    fn unknown_fields_substitute_zero() {
        let topo = sample_topology();
        let totals = SiteTotalsSnapshot {
            timestamp: 0,
            active_kw: 0.0,
            reactive_kvar: 0.0,
        };
        let snapshot = Snapshot::from_topology(&topo, totals, false);
        let sub1 = snapshot.node_data.iter().find(|n| n.key == "1").unwrap();
        assert_eq!(sub1.voltage, 0.0);
        assert_eq!(sub1.p_kw, 0.0);
        let line = &snapshot.line_data[0];
        assert_eq!(line.loading, 0.0);
        assert_eq!(line.current, 0.0);
    }

    #[test]
    fn serialises_to_the_documented_field_shape() {
        let topo = sample_topology();
        let totals = SiteTotalsSnapshot {
            timestamp: 1_700_000_000,
            active_kw: 120.0,
            reactive_kvar: 40.0,
        };
        let snapshot = Snapshot::from_topology(&topo, totals, false);
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"line_data\""));
        assert!(json.contains("\"node_data\""));
        assert!(json.contains("\"site_totals\""));
        assert!(json.contains("\"diverged\":false"));
    }

    #[test]
    fn divergence_flag_is_carried_through() {
        let topo = sample_topology();
        let totals = SiteTotalsSnapshot {
            timestamp: 0,
            active_kw: 0.0,
            reactive_kvar: 0.0,
        };
        let snapshot = Snapshot::from_topology(&topo, totals, true);
        assert!(snapshot.diverged);
    }
}
