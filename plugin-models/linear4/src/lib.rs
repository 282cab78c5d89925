//! `Linear4` prediction plugin, grounded on `plugins/Linear4.py`: fits a
//! least-squares line through the last 4 history points (index `0..3`)
//! and extrapolates to index `4`, independently for `P` and `Q`.

use gridwatch_core::error::GridResult;
use gridwatch_plugins::abi::{
    ModelPlugin, Plugin, PluginHostHandle, PluginType, PLUGIN_ABI_VERSION,
};

const WINDOW: usize = 4;

pub struct Linear4;

/// Least-squares slope/intercept of `y` against `x = 0..n-1`, then the
/// value of that line at `x = n` (one step past the window).
fn extrapolate(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_xx: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    let (slope, intercept) = if denom.abs() < f64::EPSILON {
        (0.0, sum_y / n)
    } else {
        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let intercept = (sum_y - slope * sum_x) / n;
        (slope, intercept)
    };

    slope * n + intercept
}

impl Plugin for Linear4 {
    fn register(&mut self) -> GridResult<()> {
        tracing::info!("Linear 4-Period model was loaded");
        Ok(())
    }

    fn deregister(&mut self) -> GridResult<()> {
        tracing::info!("Linear 4-Period deregistered");
        Ok(())
    }

    fn get_type(&self) -> PluginType {
        PluginType::Model
    }
}

impl ModelPlugin for Linear4 {
    fn predict_next(&self, history: &[(i64, f64, f64)]) -> Option<(f64, f64)> {
        if history.len() < WINDOW {
            return None;
        }
        let window = &history[history.len() - WINDOW..];
        let p_values: Vec<f64> = window.iter().map(|(_, p, _)| *p).collect();
        let q_values: Vec<f64> = window.iter().map(|(_, _, q)| *q).collect();
        Some((extrapolate(&p_values), extrapolate(&q_values)))
    }

    fn get_formatted_name(&self) -> String {
        "Linear4".to_string()
    }
}

#[no_mangle]
pub unsafe extern "C" fn gridwatch_plugin_abi_version() -> u32 {
    PLUGIN_ABI_VERSION
}

#[no_mangle]
pub unsafe extern "C" fn gridwatch_plugin_entry(
    _host: *const PluginHostHandle,
) -> *mut dyn ModelPlugin {
    Box::into_raw(Box::new(Linear4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declines_below_four_points() {
        let model = Linear4;
        let history = [(1, 1.0, 1.0), (2, 2.0, 2.0), (3, 3.0, 3.0)];
        assert_eq!(model.predict_next(&history), None);
    }

    #[test]
    fn extrapolates_a_perfect_line() {
        let model = Linear4;
        let history = [
            (1, 1.0, 10.0),
            (2, 2.0, 10.0),
            (3, 3.0, 10.0),
            (4, 4.0, 10.0),
        ];
        let (p, q) = model.predict_next(&history).unwrap();
        assert!((p - 5.0).abs() < 1e-9);
        assert!((q - 10.0).abs() < 1e-9);
    }
}
