//! `MovingAverage12` prediction plugin, grounded on
//! `plugins/MovingAverage12.py`: declines until `period` history entries
//! have accumulated, then predicts the trailing mean of `P` and `Q`
//! independently.

use gridwatch_core::error::GridResult;
use gridwatch_plugins::abi::{
    ModelPlugin, Plugin, PluginHostHandle, PluginType, PLUGIN_ABI_VERSION,
};

const DEFAULT_PERIOD: usize = 12;

pub struct MovingAverage {
    period: usize,
}

impl MovingAverage {
    pub fn new(period: usize) -> Self {
        MovingAverage { period }
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        MovingAverage::new(DEFAULT_PERIOD)
    }
}

impl Plugin for MovingAverage {
    fn register(&mut self) -> GridResult<()> {
        tracing::info!(period = self.period, "MovingAverage model was loaded");
        Ok(())
    }

    fn deregister(&mut self) -> GridResult<()> {
        tracing::info!(period = self.period, "MovingAverage deregistered");
        Ok(())
    }

    fn get_type(&self) -> PluginType {
        PluginType::Model
    }
}

impl ModelPlugin for MovingAverage {
    fn predict_next(&self, history: &[(i64, f64, f64)]) -> Option<(f64, f64)> {
        if history.len() < self.period {
            return None;
        }
        let window = &history[history.len() - self.period..];
        let count = window.len() as f64;
        let sum_p: f64 = window.iter().map(|(_, p, _)| p).sum();
        let sum_q: f64 = window.iter().map(|(_, _, q)| q).sum();
        Some((sum_p / count, sum_q / count))
    }

    fn get_formatted_name(&self) -> String {
        format!("MovingAverage{}", self.period)
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
    Box::into_raw(Box::new(MovingAverage::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declines_below_the_period() {
        let model = MovingAverage::new(4);
        let history = [(1, 1.0, 1.0), (2, 2.0, 2.0)];
        assert_eq!(model.predict_next(&history), None);
    }

    #[test]
    fn averages_the_trailing_window() {
        let model = MovingAverage::new(4);
        let history = [
            (1, 1.0, 0.5),
            (2, 2.0, 0.5),
            (3, 3.0, 0.5),
            (4, 4.0, 0.5),
        ];
        assert_eq!(model.predict_next(&history), Some((2.5, 0.5)));
    }

    #[test]
    fn formatted_name_includes_the_period() {
        assert_eq!(MovingAverage::new(12).get_formatted_name(), "MovingAverage12");
    }
}
