//! Reference `PowerFlowBackend`: a dense Newton-Raphson AC power-flow
//! solver, condensed from `gat-algo`'s `power_flow::ac_pf` module to the
//! surface spec §6 actually needs.
//!
//! Differences from the teacher version (noted in DESIGN.md): no PV buses
//! (this network has no generators, only an external grid at the slack and
//! loads everywhere else), so there is no Q-limit / PV-PQ switching pass and
//! every non-slack bus contributes both a P and a Q row to the Jacobian.
//! The dense Gaussian-elimination fallback is dropped; `faer`'s
//! partial-pivot LU is the only linear solve path, matching the teacher's
//! preferred `solve_linear_system_faer`.

use std::collections::HashMap;
use std::f64::consts::PI;

use faer::prelude::SpSolver;
use faer::Mat;
use num_complex::{Complex64, ComplexFloat};

use crate::error::{GridError, GridResult};
use crate::topology::LineType;
use crate::units::{Degrees, Kilovolts, Megavars, Megawatts, PerUnit};

use super::backend::{BusResult, LineResult, PowerFlowBackend, PowerFlowReport};

const BASE_MVA: f64 = 100.0;
const FREQUENCY_HZ: f64 = 50.0;
const TOLERANCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 20;

struct BusRecord {
    key: u32,
    nominal_kv: f64,
}

struct BranchRecord {
    key: u32,
    from: u32,
    to: u32,
    r_pu: f64,
    x_pu: f64,
    b_pu: f64,
    max_current_ka: f64,
    base_kv: f64,
}

struct LoadRecord {
    bus: u32,
    p_mw: f64,
    q_mvar: f64,
    scaling: f64,
}

/// Dense Newton-Raphson AC power-flow backend. Buses are either the slack
/// (attached via [`PowerFlowBackend::create_external_grid`]) or plain PQ
/// buses — there is no generator/PV concept in this network.
pub struct NewtonRaphsonBackend {
    cable_types: HashMap<String, LineType>,
    buses: Vec<BusRecord>,
    key_to_index: HashMap<u32, usize>,
    slack_buses: std::collections::HashSet<u32>,
    branches: Vec<BranchRecord>,
    loads: Vec<LoadRecord>,
    bus_results: HashMap<u32, BusResult>,
    line_results: HashMap<u32, LineResult>,
}

impl NewtonRaphsonBackend {
    pub fn new() -> Self {
        Self {
            cable_types: HashMap::new(),
            buses: Vec::new(),
            key_to_index: HashMap::new(),
            slack_buses: std::collections::HashSet::new(),
            branches: Vec::new(),
            loads: Vec::new(),
            bus_results: HashMap::new(),
            line_results: HashMap::new(),
        }
    }

    fn bus_index(&self, key: u32) -> GridResult<usize> {
        self.key_to_index
            .get(&key)
            .copied()
            .ok_or_else(|| GridError::ConfigInvalid(format!("unknown bus key {key}")))
    }

    fn build_y_bus(&self, n: usize) -> Vec<Vec<Complex64>> {
        let mut y_bus = vec![vec![Complex64::new(0.0, 0.0); n]; n];
        for branch in &self.branches {
            let Some(&i) = self.key_to_index.get(&branch.from) else {
                continue;
            };
            let Some(&j) = self.key_to_index.get(&branch.to) else {
                continue;
            };
            let z = Complex64::new(branch.r_pu, branch.x_pu);
            if z.norm_sqr() < 1e-12 {
                continue;
            }
            let y_series = z.recip();
            let b_half = Complex64::new(0.0, branch.b_pu / 2.0);
            y_bus[i][i] += y_series + b_half;
            y_bus[j][j] += y_series + b_half;
            y_bus[i][j] -= y_series;
            y_bus[j][i] -= y_series;
        }
        y_bus
    }

    fn compute_power(&self, y_bus: &[Vec<Complex64>], v_mag: &[f64], v_ang: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = v_mag.len();
        let mut p = vec![0.0; n];
        let mut q = vec![0.0; n];
        for i in 0..n {
            for j in 0..n {
                let g_ij = y_bus[i][j].re;
                let b_ij = y_bus[i][j].im;
                let theta_ij = v_ang[i] - v_ang[j];
                let (sin_t, cos_t) = theta_ij.sin_cos();
                p[i] += v_mag[i] * v_mag[j] * (g_ij * cos_t + b_ij * sin_t);
                q[i] += v_mag[i] * v_mag[j] * (g_ij * sin_t - b_ij * cos_t);
            }
        }
        (p, q)
    }

    fn dp_dtheta(&self, y_bus: &[Vec<Complex64>], v_mag: &[f64], v_ang: &[f64], i: usize, j: usize) -> f64 {
        let g_ij = y_bus[i][j].re;
        let b_ij = y_bus[i][j].im;
        let theta_ij = v_ang[i] - v_ang[j];
        if i == j {
            let n = v_mag.len();
            let mut q_i = 0.0;
            for k in 0..n {
                let theta_ik = v_ang[i] - v_ang[k];
                q_i += v_mag[i] * v_mag[k] * (y_bus[i][k].re * theta_ik.sin() - y_bus[i][k].im * theta_ik.cos());
            }
            -q_i - b_ij * v_mag[i] * v_mag[i]
        } else {
            v_mag[i] * v_mag[j] * (g_ij * theta_ij.sin() - b_ij * theta_ij.cos())
        }
    }

    fn dp_dv(&self, y_bus: &[Vec<Complex64>], v_mag: &[f64], v_ang: &[f64], i: usize, j: usize) -> f64 {
        let g_ij = y_bus[i][j].re;
        let b_ij = y_bus[i][j].im;
        let theta_ij = v_ang[i] - v_ang[j];
        if i == j {
            let n = v_mag.len();
            let mut p_i = 0.0;
            for k in 0..n {
                let theta_ik = v_ang[i] - v_ang[k];
                p_i += v_mag[i] * v_mag[k] * (y_bus[i][k].re * theta_ik.cos() + y_bus[i][k].im * theta_ik.sin());
            }
            p_i / v_mag[i] + g_ij * v_mag[i]
        } else {
            v_mag[i] * (g_ij * theta_ij.cos() + b_ij * theta_ij.sin())
        }
    }

    fn dq_dtheta(&self, y_bus: &[Vec<Complex64>], v_mag: &[f64], v_ang: &[f64], i: usize, j: usize) -> f64 {
        let g_ij = y_bus[i][j].re;
        let theta_ij = v_ang[i] - v_ang[j];
        if i == j {
            let n = v_mag.len();
            let mut p_i = 0.0;
            for k in 0..n {
                let theta_ik = v_ang[i] - v_ang[k];
                p_i += v_mag[i] * v_mag[k] * (y_bus[i][k].re * theta_ik.cos() + y_bus[i][k].im * theta_ik.sin());
            }
            p_i - g_ij * v_mag[i] * v_mag[i]
        } else {
            -v_mag[i] * v_mag[j] * (g_ij * theta_ij.cos() + y_bus[i][j].im * theta_ij.sin())
        }
    }

    fn dq_dv(&self, y_bus: &[Vec<Complex64>], v_mag: &[f64], v_ang: &[f64], i: usize, j: usize) -> f64 {
        let g_ij = y_bus[i][j].re;
        let b_ij = y_bus[i][j].im;
        let theta_ij = v_ang[i] - v_ang[j];
        if i == j {
            let n = v_mag.len();
            let mut q_i = 0.0;
            for k in 0..n {
                let theta_ik = v_ang[i] - v_ang[k];
                q_i += v_mag[i] * v_mag[k] * (y_bus[i][k].re * theta_ik.sin() - y_bus[i][k].im * theta_ik.cos());
            }
            q_i / v_mag[i] - b_ij * v_mag[i]
        } else {
            v_mag[i] * (g_ij * theta_ij.sin() - b_ij * theta_ij.cos())
        }
    }

    fn solve_linear_system(&self, a: &[Vec<f64>], b: &[f64]) -> GridResult<Vec<f64>> {
        let n = b.len();
        if n == 0 {
            return Ok(vec![]);
        }
        let mut mat = Mat::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                mat.write(i, j, a[i][j]);
            }
        }
        let mut rhs = Mat::zeros(n, 1);
        for i in 0..n {
            rhs.write(i, 0, b[i]);
        }
        let lu = mat.partial_piv_lu();
        let solution = lu.solve(&rhs);
        let x: Vec<f64> = (0..n).map(|i| solution.read(i, 0)).collect();
        if x.iter().any(|v| !v.is_finite()) {
            return Err(GridError::Other("singular Jacobian in power-flow solve".to_string()));
        }
        Ok(x)
    }
}

impl Default for NewtonRaphsonBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerFlowBackend for NewtonRaphsonBackend {
    fn register_cable_type(&mut self, cable: &LineType) -> GridResult<()> {
        self.cable_types.insert(cable.name.clone(), cable.clone());
        Ok(())
    }

    fn create_bus(&mut self, key: u32, nominal_kv: Kilovolts) -> GridResult<()> {
        if self.key_to_index.contains_key(&key) {
            return Err(GridError::ConfigInvalid(format!("duplicate bus key {key}")));
        }
        self.key_to_index.insert(key, self.buses.len());
        self.buses.push(BusRecord {
            key,
            nominal_kv: nominal_kv.value(),
        });
        Ok(())
    }

    fn create_line(
        &mut self,
        key: u32,
        cable_type: &str,
        from_bus: u32,
        to_bus: u32,
        length_km: f64,
    ) -> GridResult<()> {
        let cable = self
            .cable_types
            .get(cable_type)
            .ok_or_else(|| GridError::ConfigInvalid(format!("unknown cable type '{cable_type}'")))?;
        let from_idx = self.bus_index(from_bus)?;
        let base_kv = self.buses[from_idx].nominal_kv;
        let z_base = base_kv * base_kv / BASE_MVA;
        let y_base = 1.0 / z_base;

        let r_pu = (cable.resistance_ohm_km * length_km) / z_base;
        let x_pu = (cable.reactance_ohm_km * length_km) / z_base;
        let c_farads = cable.capacitance_nf_km * length_km * 1e-9;
        let b_siemens = 2.0 * PI * FREQUENCY_HZ * c_farads;
        let b_pu = b_siemens / y_base;

        self.branches.push(BranchRecord {
            key,
            from: from_bus,
            to: to_bus,
            r_pu,
            x_pu,
            b_pu,
            max_current_ka: cable.max_current_ka,
            base_kv,
        });
        Ok(())
    }

    fn create_external_grid(&mut self, bus: u32) -> GridResult<()> {
        self.slack_buses.insert(bus);
        Ok(())
    }

    fn create_load(
        &mut self,
        bus: u32,
        p_mw: Megawatts,
        q_mvar: Megavars,
        scaling: f64,
        _name: &str,
    ) -> GridResult<()> {
        self.loads.push(LoadRecord {
            bus,
            p_mw: p_mw.value(),
            q_mvar: q_mvar.value(),
            scaling,
        });
        Ok(())
    }

    fn clear_loads(&mut self) {
        self.loads.clear();
    }

    fn run_power_flow(&mut self) -> GridResult<PowerFlowReport> {
        let n = self.buses.len();
        self.bus_results.clear();
        self.line_results.clear();

        if n == 0 {
            return Ok(PowerFlowReport {
                converged: true,
                iterations: 0,
                max_mismatch: 0.0,
            });
        }

        let y_bus = self.build_y_bus(n);

        let mut p_spec = vec![0.0; n];
        let mut q_spec = vec![0.0; n];
        for load in &self.loads {
            if let Some(&idx) = self.key_to_index.get(&load.bus) {
                p_spec[idx] -= load.p_mw * load.scaling;
                q_spec[idx] -= load.q_mvar * load.scaling;
            }
        }
        for v in p_spec.iter_mut() {
            *v /= BASE_MVA;
        }
        for v in q_spec.iter_mut() {
            *v /= BASE_MVA;
        }

        let mut v_mag = vec![1.0; n];
        let mut v_ang = vec![0.0; n];

        let non_slack: Vec<usize> = (0..n)
            .filter(|i| !self.slack_buses.contains(&self.buses[*i].key))
            .collect();
        let m = non_slack.len();
        let n_vars = 2 * m;

        let mut converged = false;
        let mut iterations = 0;
        let mut max_mismatch = 0.0;

        if n_vars > 0 {
            for iter in 0..MAX_ITERATIONS {
                let (p_calc, q_calc) = self.compute_power(&y_bus, &v_mag, &v_ang);
                let mut mismatch = vec![0.0; n_vars];
                max_mismatch = 0.0;
                for (k, &i) in non_slack.iter().enumerate() {
                    mismatch[k] = p_spec[i] - p_calc[i];
                    mismatch[m + k] = q_spec[i] - q_calc[i];
                    max_mismatch = max_mismatch.max(mismatch[k].abs()).max(mismatch[m + k].abs());
                }

                if max_mismatch < TOLERANCE {
                    converged = true;
                    iterations = iter + 1;
                    break;
                }

                let mut jacobian = vec![vec![0.0; n_vars]; n_vars];
                for (row, &i) in non_slack.iter().enumerate() {
                    for (col, &j) in non_slack.iter().enumerate() {
                        jacobian[row][col] = self.dp_dtheta(&y_bus, &v_mag, &v_ang, i, j);
                        jacobian[row][m + col] = self.dp_dv(&y_bus, &v_mag, &v_ang, i, j);
                        jacobian[m + row][col] = self.dq_dtheta(&y_bus, &v_mag, &v_ang, i, j);
                        jacobian[m + row][m + col] = self.dq_dv(&y_bus, &v_mag, &v_ang, i, j);
                    }
                }

                // A singular Jacobian (e.g. an islanded bus) means this
                // iteration can't refine the estimate further; treat it the
                // same as exhausting the iteration budget rather than
                // propagating the error out of the tick pipeline (spec §4.6/
                // §7 `FLOW_DIVERGED` is recovered locally, never fatal).
                let delta = match self.solve_linear_system(&jacobian, &mismatch) {
                    Ok(delta) => delta,
                    Err(_) => {
                        iterations = iter + 1;
                        break;
                    }
                };
                for (k, &i) in non_slack.iter().enumerate() {
                    v_ang[i] += delta[k];
                    v_mag[i] += delta[m + k];
                }
                iterations = iter + 1;
            }

            if !converged {
                let (p_calc, q_calc) = self.compute_power(&y_bus, &v_mag, &v_ang);
                max_mismatch = 0.0;
                for &i in &non_slack {
                    max_mismatch = max_mismatch.max((p_spec[i] - p_calc[i]).abs());
                    max_mismatch = max_mismatch.max((q_spec[i] - q_calc[i]).abs());
                }
            }
        } else {
            converged = true;
        }

        let (p_calc, q_calc) = self.compute_power(&y_bus, &v_mag, &v_ang);
        for (i, bus) in self.buses.iter().enumerate() {
            self.bus_results.insert(
                bus.key,
                BusResult {
                    vm_pu: PerUnit(v_mag[i]),
                    va_deg: Degrees(v_ang[i].to_degrees()),
                    p_mw: Megawatts(p_calc[i] * BASE_MVA),
                    q_mvar: Megavars(q_calc[i] * BASE_MVA),
                },
            );
        }

        for branch in &self.branches {
            let Some(&i) = self.key_to_index.get(&branch.from) else {
                continue;
            };
            let Some(&j) = self.key_to_index.get(&branch.to) else {
                continue;
            };
            let z = Complex64::new(branch.r_pu, branch.x_pu);
            if z.norm_sqr() < 1e-12 {
                continue;
            }
            let y_series = z.recip();
            let b_half = Complex64::new(0.0, branch.b_pu / 2.0);

            let v_i = Complex64::from_polar(v_mag[i], v_ang[i]);
            let v_j = Complex64::from_polar(v_mag[j], v_ang[j]);

            let i_from = (v_i - v_j) * y_series + v_i * b_half;
            let i_to = (v_j - v_i) * y_series + v_j * b_half;

            let s_from = v_i * i_from.conj();
            let s_to = v_j * i_to.conj();

            let i_base_ka = BASE_MVA / (3f64.sqrt() * branch.base_kv);
            let i_from_ka = i_from.norm() * i_base_ka;
            let i_to_ka = i_to.norm() * i_base_ka;

            let loading_percent = if branch.max_current_ka > 1e-12 {
                i_from_ka.max(i_to_ka) / branch.max_current_ka * 100.0
            } else {
                0.0
            };

            self.line_results.insert(
                branch.key,
                LineResult {
                    loading_percent,
                    i_from_ka: crate::units::Kiloamperes(i_from_ka),
                    i_to_ka: crate::units::Kiloamperes(i_to_ka),
                    p_from_mw: Megawatts(s_from.re * BASE_MVA),
                    q_from_mvar: Megavars(s_from.im * BASE_MVA),
                    p_to_mw: Megawatts(s_to.re * BASE_MVA),
                    q_to_mvar: Megavars(s_to.im * BASE_MVA),
                    pl_mw: Megawatts((s_from.re + s_to.re) * BASE_MVA),
                    ql_mvar: Megavars((s_from.im + s_to.im) * BASE_MVA),
                },
            );
        }

        Ok(PowerFlowReport {
            converged,
            iterations,
            max_mismatch,
        })
    }

    fn bus_result(&self, bus: u32) -> Option<BusResult> {
        self.bus_results.get(&bus).copied()
    }

    fn line_result(&self, key: u32) -> Option<LineResult> {
        self.line_results.get(&key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn two_bus_radial_converges_and_balances_voltage_drop() {
        let mut backend = NewtonRaphsonBackend::new();
        backend.register_cable_type(&sample_cable()).unwrap();
        backend.create_bus(0, Kilovolts(11.0)).unwrap();
        backend.create_bus(1, Kilovolts(11.0)).unwrap();
        backend.create_external_grid(0).unwrap();
        backend.create_line(0, "XLPE-95", 0, 1, 0.5).unwrap();
        backend
            .create_load(1, Megawatts(0.12), Megavars(0.04), 1.0, "SUB-1")
            .unwrap();

        let report = backend.run_power_flow().unwrap();
        assert!(report.converged);

        let slack = backend.bus_result(0).unwrap();
        assert!((slack.vm_pu.value() - 1.0).abs() < 1e-9);

        let load_bus = backend.bus_result(1).unwrap();
        assert!(load_bus.vm_pu.value() < 1.0);
        assert!(load_bus.vm_pu.value() > 0.9);

        let line = backend.line_result(0).unwrap();
        assert!(line.p_from_mw.value() > 0.0);
        assert!(line.loading_percent >= 0.0);
    }

    #[test]
    fn empty_network_converges_trivially() {
        let mut backend = NewtonRaphsonBackend::new();
        let report = backend.run_power_flow().unwrap();
        assert!(report.converged);
    }

    #[test]
    fn clear_loads_resets_injections() {
        let mut backend = NewtonRaphsonBackend::new();
        backend.register_cable_type(&sample_cable()).unwrap();
        backend.create_bus(0, Kilovolts(11.0)).unwrap();
        backend.create_bus(1, Kilovolts(11.0)).unwrap();
        backend.create_external_grid(0).unwrap();
        backend.create_line(0, "XLPE-95", 0, 1, 0.5).unwrap();
        backend
            .create_load(1, Megawatts(0.5), Megavars(0.2), 1.0, "SUB-1")
            .unwrap();
        backend.run_power_flow().unwrap();
        let loaded = backend.bus_result(1).unwrap();

        backend.clear_loads();
        backend.run_power_flow().unwrap();
        let unloaded = backend.bus_result(1).unwrap();

        assert!(unloaded.vm_pu.value() > loaded.vm_pu.value());
    }

    #[test]
    fn islanded_bus_reports_non_convergence_instead_of_erroring() {
        // Bus 1 carries a load but is never connected to the slack by a
        // line, so its row of the Y-bus is zero and the Jacobian is
        // singular. Spec §4.6/§7 requires this to surface as a
        // non-converged report, not a propagated error.
        let mut backend = NewtonRaphsonBackend::new();
        backend.register_cable_type(&sample_cable()).unwrap();
        backend.create_bus(0, Kilovolts(11.0)).unwrap();
        backend.create_bus(1, Kilovolts(11.0)).unwrap();
        backend.create_external_grid(0).unwrap();
        backend
            .create_load(1, Megawatts(0.12), Megavars(0.04), 1.0, "SUB-1")
            .unwrap();

        let report = backend.run_power_flow().unwrap();
        assert!(!report.converged);
    }
}
