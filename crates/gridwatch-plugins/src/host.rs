//! The plugin host itself (spec §4.4), grounded on `plugin_host.py`'s
//! `PluginHost` class as a whole: `load_plugin`/`reload_plugin`/
//! `unload_plugin`'s idempotent-under-observed-hash state machine,
//! `process_plugin_events`'s queue drain, and `get_all_plugins`'s
//! capability filter.
//!
//! Unlike the original, transitions are never driven directly by a caller
//! invoking `load_plugin` mid-tick — the watcher enqueues `PluginEvent`s and
//! `process_events` (called by the tick orchestrator between ticks, spec
//! §4.4 "Processing runs on the tick orchestrator thread") is the only
//! thing that drains them. The public `load_plugin`/`reload_plugin`/
//! `unload_plugin` methods remain directly callable (e.g. for a one-off
//! initial `load_all` at startup) and share the exact same idempotency
//! rule the queued path uses.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{info, warn};

use gridwatch_core::error::{GridError, GridResult};
use gridwatch_core::prediction::PredictionModel;

use crate::abi::PluginType;
use crate::adapter::ModelAdapter;
use crate::discovery::{discover, PluginUnit};
use crate::hashing::hash_unit;
use crate::loader::{load_unit, LoadedPlugin};
use crate::watcher::{PluginEvent, PluginWatcher, DEFAULT_POLL_INTERVAL};

struct RegistryEntry {
    unit: PluginUnit,
    hash: String,
    plugin: Arc<LoadedPlugin>,
}

/// Host startup configuration.
pub struct PluginHostConfig {
    pub plugin_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub poll_interval: Duration,
}

impl PluginHostConfig {
    pub fn new(plugin_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        PluginHostConfig {
            plugin_dir: plugin_dir.into(),
            scratch_dir: scratch_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Discovers, loads, hot-reloads, and unloads prediction-model plugins
/// (spec §4.4). Shared across orchestrators behind an `Arc` (spec §5):
/// mutation is confined to `process_events`/`load_plugin`/`reload_plugin`/
/// `unload_plugin`, all of which take `&self` and lock only the registry
/// map, never a whole-host lock — readers see a point-in-time snapshot.
pub struct PluginHost {
    config: PluginHostConfig,
    registry: RwLock<HashMap<String, RegistryEntry>>,
    watcher: Option<PluginWatcher>,
}

impl PluginHost {
    pub fn new(config: PluginHostConfig) -> Self {
        PluginHost {
            config,
            registry: RwLock::new(HashMap::new()),
            watcher: None,
        }
    }

    /// Start the background directory watcher (spec §4.4, §5 "a single
    /// background watcher task per host instance"). Idempotent: calling
    /// twice replaces the previous watcher, stopping it first.
    pub fn spawn_watcher(&mut self) {
        self.watcher = Some(PluginWatcher::spawn(
            self.config.plugin_dir.clone(),
            self.config.poll_interval,
        ));
    }

    /// Discover every unit currently on disk and load each one (initial
    /// `load_all`, matching `PluginHost.load_all`).
    pub fn load_all(&self) {
        let units = match discover(&self.config.plugin_dir) {
            Ok(units) => units,
            Err(e) => {
                warn!(error = %e, "initial plugin discovery failed");
                return;
            }
        };
        for unit in units {
            let name = unit.name().to_string();
            if let Err(e) = self.load_plugin(&name) {
                warn!(plugin = %name, error = %e, "failed to load plugin at startup");
            }
        }
    }

    /// Drain every event the watcher has queued since the last drain and
    /// apply it (spec §4.4 "Processing runs on the tick orchestrator
    /// thread"). Returns the number of events applied.
    pub fn process_events(&self) -> usize {
        let Some(watcher) = &self.watcher else {
            return 0;
        };
        let events = watcher.drain();
        let count = events.len();
        for event in events {
            match event {
                PluginEvent::Load(name) => {
                    if let Err(e) = self.load_plugin(&name) {
                        warn!(plugin = %name, error = %e, "queued plugin load failed");
                    }
                }
                PluginEvent::Reload(name) => {
                    if let Err(e) = self.reload_plugin(&name) {
                        warn!(plugin = %name, error = %e, "queued plugin reload failed");
                    }
                }
                PluginEvent::Unload(name) => {
                    self.unload_plugin(&name);
                }
            }
        }
        count
    }

    fn find_unit(&self, name: &str) -> GridResult<PluginUnit> {
        let units = discover(&self.config.plugin_dir)?;
        units
            .into_iter()
            .find(|u| u.name() == name)
            .ok_or_else(|| GridError::PluginLoadFailed(name.to_string(), "unit no longer on disk".into()))
    }

    /// Load `name` if absent, or delegate to [`reload_plugin`] if it is
    /// already loaded — the public entry point is idempotent under the
    /// observed-hash rule (spec §4.4 state machine).
    pub fn load_plugin(&self, name: &str) -> GridResult<()> {
        let unit = self.find_unit(name)?;
        let hash = hash_unit(&unit)?;

        let already_loaded = {
            let registry = self.registry.read().expect("plugin registry lock poisoned");
            registry.get(name).map(|entry| entry.hash.clone())
        };

        match already_loaded {
            None => self.do_load(unit, hash),
            Some(existing_hash) if existing_hash == hash => Ok(()), // no-op: unchanged
            Some(_) => self.reload_plugin(name),
        }
    }

    fn do_load(&self, unit: PluginUnit, hash: String) -> GridResult<()> {
        let name = unit.name().to_string();
        let mut loaded = load_unit(&unit, &self.config.scratch_dir, hash.clone())?;
        if let Err(e) = loaded.instance.register() {
            warn!(plugin = %name, error = ?e, "error registering new plugin instance during load");
        }
        let mut registry = self.registry.write().expect("plugin registry lock poisoned");
        registry.insert(
            name.clone(),
            RegistryEntry {
                unit,
                hash,
                plugin: Arc::new(loaded),
            },
        );
        info!(plugin = %name, "loaded plugin");
        Ok(())
    }

    /// Reload `name` if its content hash changed, or load it fresh if it
    /// is not yet present (spec §4.4 reload algorithm). A failing
    /// `deregister()` on the old instance is logged, not propagated; a
    /// failing reload removes the entry entirely and surfaces
    /// `PLUGIN_RELOAD_FAILED` so a subsequent file change can re-load it.
    pub fn reload_plugin(&self, name: &str) -> GridResult<()> {
        let unit = self.find_unit(name)?;
        let new_hash = hash_unit(&unit)?;

        let old = {
            let registry = self.registry.read().expect("plugin registry lock poisoned");
            registry.get(name).map(|e| e.hash.clone())
        };

        match old {
            None => return self.do_load(unit, new_hash),
            Some(old_hash) if old_hash == new_hash => return Ok(()), // no-op: unchanged
            Some(_) => {}
        }

        {
            let mut registry = self.registry.write().expect("plugin registry lock poisoned");
            if let Some(mut entry) = registry.remove(name) {
                if let Some(loaded) = Arc::get_mut(&mut entry.plugin) {
                    if let Err(e) = loaded.instance.deregister() {
                        warn!(plugin = %name, error = ?e, "error deregistering old plugin instance during reload");
                    }
                } else {
                    warn!(plugin = %name, "old plugin instance still referenced; skipping deregister");
                }
            }
        }

        match load_unit(&unit, &self.config.scratch_dir, new_hash.clone()) {
            Ok(mut loaded) => {
                if let Err(e) = loaded.instance.register() {
                    warn!(plugin = %name, error = ?e, "error registering new plugin instance during reload");
                }
                let mut registry = self.registry.write().expect("plugin registry lock poisoned");
                registry.insert(
                    name.to_string(),
                    RegistryEntry {
                        unit,
                        hash: new_hash,
                        plugin: Arc::new(loaded),
                    },
                );
                info!(plugin = %name, "reloaded plugin");
                Ok(())
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "plugin reload failed; entry removed");
                Err(GridError::PluginReloadFailed(name.to_string(), e.to_string()))
            }
        }
    }

    /// Unload `name`: `deregister()` on the instance (errors logged, not
    /// propagated) and remove it from the registry.
    pub fn unload_plugin(&self, name: &str) {
        let mut registry = self.registry.write().expect("plugin registry lock poisoned");
        let Some(mut entry) = registry.remove(name) else {
            return;
        };
        if let Some(loaded) = Arc::get_mut(&mut entry.plugin) {
            if let Err(e) = loaded.instance.deregister() {
                warn!(plugin = %name, error = ?e, "error deregistering plugin during unload");
            }
        }
        info!(plugin = %name, "unloaded plugin");
    }

    /// Capability filter (spec §4.4 `get_all(type_tag)`): instances whose
    /// `get_type()` matches, wrapped as [`PredictionModel`]s for
    /// `MODEL`-tagged plugins (the only ABI surface this host's loader
    /// accepts — the schema check collapses to the ABI-version compare in
    /// [`crate::loader`]).
    pub fn get_all(&self, type_tag: PluginType) -> Vec<(String, Arc<dyn PredictionModel>)> {
        let registry = self.registry.read().expect("plugin registry lock poisoned");
        registry
            .values()
            .filter(|entry| entry.plugin.instance.get_type() == type_tag)
            .map(|entry| {
                let name = entry.unit.name().to_string();
                let adapter: Arc<dyn PredictionModel> =
                    Arc::new(ModelAdapter::new(name.clone(), entry.plugin.clone()));
                (name, adapter)
            })
            .collect()
    }

    /// Look up one currently loaded `MODEL` plugin by name.
    pub fn model_by_name(&self, name: &str) -> Option<Arc<dyn PredictionModel>> {
        let registry = self.registry.read().expect("plugin registry lock poisoned");
        let entry = registry.get(name)?;
        if entry.plugin.instance.get_type() != PluginType::Model {
            return None;
        }
        Some(Arc::new(ModelAdapter::new(name.to_string(), entry.plugin.clone())) as Arc<dyn PredictionModel>)
    }

    pub fn loaded_names(&self) -> Vec<String> {
        let registry = self.registry.read().expect("plugin registry lock poisoned");
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_plugin_on_missing_unit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let host = PluginHost::new(PluginHostConfig::new(
            dir.path().join("plugins"),
            dir.path().join("scratch"),
        ));
        assert!(host.load_plugin("ghost").is_err());
    }

    #[test]
    fn get_all_on_empty_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let host = PluginHost::new(PluginHostConfig::new(
            dir.path().join("plugins"),
            dir.path().join("scratch"),
        ));
        assert!(host.get_all(PluginType::Model).is_empty());
    }

    #[test]
    fn unload_of_absent_plugin_is_a_silent_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let host = PluginHost::new(PluginHostConfig::new(
            dir.path().join("plugins"),
            dir.path().join("scratch"),
        ));
        host.unload_plugin("never-loaded");
        assert!(host.loaded_names().is_empty());
    }
}
