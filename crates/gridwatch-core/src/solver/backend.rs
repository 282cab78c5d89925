//! The capability boundary spec §6 names as an external numerical
//! dependency: a trait narrow enough that the tick pipeline never knows
//! which power-flow kernel it is driving.

use crate::error::GridResult;
use crate::topology::LineType;
use crate::units::{Degrees, Kiloamperes, Kilovolts, Megavars, Megawatts, PerUnit};

/// Result of a converged (or diverged) power-flow run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerFlowReport {
    pub converged: bool,
    pub iterations: usize,
    pub max_mismatch: f64,
}

/// Per-bus result row, keyed by the same integer key used at creation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BusResult {
    pub vm_pu: PerUnit,
    pub va_deg: Degrees,
    pub p_mw: Megawatts,
    pub q_mvar: Megavars,
}

/// Per-line result row, keyed by the same integer key used at creation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LineResult {
    pub loading_percent: f64,
    pub i_from_ka: Kiloamperes,
    pub i_to_ka: Kiloamperes,
    pub p_from_mw: Megawatts,
    pub q_from_mvar: Megavars,
    pub p_to_mw: Megawatts,
    pub q_to_mvar: Megavars,
    pub pl_mw: Megawatts,
    pub ql_mvar: Megavars,
}

/// A pluggable AC power-flow numerical kernel.
///
/// Bus and line identity is the integer key the caller chose at creation
/// time (the node/line key from the topology model) — there is no separate
/// solver-side index to track.
pub trait PowerFlowBackend: Send {
    fn register_cable_type(&mut self, cable: &LineType) -> GridResult<()>;

    fn create_bus(&mut self, key: u32, nominal_kv: Kilovolts) -> GridResult<()>;

    fn create_line(
        &mut self,
        key: u32,
        cable_type: &str,
        from_bus: u32,
        to_bus: u32,
        length_km: f64,
    ) -> GridResult<()>;

    fn create_external_grid(&mut self, bus: u32) -> GridResult<()>;

    fn create_load(
        &mut self,
        bus: u32,
        p_mw: Megawatts,
        q_mvar: Megavars,
        scaling: f64,
        name: &str,
    ) -> GridResult<()>;

    /// Remove every load created since the last call, leaving buses, lines,
    /// cable types, and the external grid connection untouched.
    fn clear_loads(&mut self);

    fn run_power_flow(&mut self) -> GridResult<PowerFlowReport>;

    fn bus_result(&self, bus: u32) -> Option<BusResult>;

    fn line_result(&self, key: u32) -> Option<LineResult>;
}
