//! `LastKnownValue` prediction plugin (spec §4.5 "model prediction over
//! that node's recent history"), grounded on `plugins/LKV.py`: predicts
//! the most recent observed `(P, Q)` pair, or declines when history is
//! empty.

use gridwatch_core::error::GridResult;
use gridwatch_plugins::abi::{
    ModelPlugin, Plugin, PluginHostHandle, PluginType, PLUGIN_ABI_VERSION,
};

pub struct LastKnownValue;

impl Plugin for LastKnownValue {
    fn register(&mut self) -> GridResult<()> {
        tracing::info!("LastKnownValue model was loaded");
        Ok(())
    }

    fn deregister(&mut self) -> GridResult<()> {
        tracing::info!("LastKnownValue deregistered");
        Ok(())
    }

    fn get_type(&self) -> PluginType {
        PluginType::Model
    }
}

impl ModelPlugin for LastKnownValue {
    fn predict_next(&self, history: &[(i64, f64, f64)]) -> Option<(f64, f64)> {
        let (_, p, q) = *history.last()?;
        Some((p, q))
    }

    fn get_formatted_name(&self) -> String {
        "LastKnownValue".to_string()
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
    Box::into_raw(Box::new(LastKnownValue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicts_the_most_recent_pair() {
        let model = LastKnownValue;
        let history = [(1, 1.0, 0.5), (2, 2.0, 0.6), (3, 3.0, 0.7)];
        assert_eq!(model.predict_next(&history), Some((3.0, 0.7)));
    }

    #[test]
    fn declines_on_empty_history() {
        let model = LastKnownValue;
        assert_eq!(model.predict_next(&[]), None);
    }
}
