//! Background plugin-directory watcher (spec §4.4), grounded on
//! `plugin_host.py`'s `_watch_for_changes`/`start_watcher`/`stop_watcher`
//! trio: a dedicated thread that notices additions, removals, and content
//! changes and turns them into typed events for the orchestrator thread to
//! drain — the watcher itself never touches a loaded plugin.
//!
//! The original polls with `time.sleep`; this realization drives the same
//! discover-then-hash-compare logic off actual filesystem notifications via
//! `notify`, falling back to a coarse periodic rescan so a watcher backend
//! that misses an event (common on some network filesystems) cannot wedge
//! the host forever.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::discovery::discover;
use crate::hashing::hash_unit;

/// A change the watcher observed, to be applied by the orchestrator thread
/// (spec §4.4: "Processing runs on the tick orchestrator thread, never
/// inside the watcher").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    Load(String),
    Reload(String),
    Unload(String),
}

/// Default rescan cadence, matching `PluginHost.__init__`'s
/// `poll_interval=2.0` default.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A running watcher: the receiving end of its event queue plus the join
/// handle and a stop switch.
pub struct PluginWatcher {
    events: Receiver<PluginEvent>,
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PluginWatcher {
    /// Start watching `plugin_dir` on a background thread.
    pub fn spawn(plugin_dir: PathBuf, poll_interval: Duration) -> PluginWatcher {
        let (event_tx, event_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("gridwatch-plugin-watcher".into())
            .spawn(move || watch_loop(plugin_dir, poll_interval, event_tx, stop_rx))
            .expect("failed to spawn plugin watcher thread");

        PluginWatcher {
            events: event_rx,
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Drain every event queued since the last drain, without blocking.
    pub fn drain(&self) -> Vec<PluginEvent> {
        self.events.try_iter().collect()
    }

    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PluginWatcher {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watch_loop(
    plugin_dir: PathBuf,
    poll_interval: Duration,
    events: mpsc::Sender<PluginEvent>,
    stop_rx: mpsc::Receiver<()>,
) {
    let (fs_tx, fs_rx) = mpsc::channel();
    let mut fs_watcher: Option<RecommendedWatcher> = match notify::recommended_watcher(fs_tx) {
        Ok(mut watcher) => match watcher.watch(&plugin_dir, RecursiveMode::Recursive) {
            Ok(()) => Some(watcher),
            Err(e) => {
                warn!(error = %e, dir = %plugin_dir.display(), "failed to watch plugin directory, falling back to polling only");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "failed to construct filesystem watcher, falling back to polling only");
            None
        }
    };
    let _ = &fs_watcher; // kept alive for the duration of the loop

    let mut last_seen: HashMap<String, String> = HashMap::new();

    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }

        // Drain any raw filesystem events without acting on them directly —
        // their only job is to wake the rescan below sooner than
        // `poll_interval` would.
        while fs_rx.try_recv().is_ok() {}

        rescan(&plugin_dir, &mut last_seen, &events);

        if stop_rx.recv_timeout(poll_interval).is_ok() {
            break;
        }
    }

    fs_watcher = None;
    drop(fs_watcher);
}

fn rescan(
    plugin_dir: &PathBuf,
    last_seen: &mut HashMap<String, String>,
    events: &mpsc::Sender<PluginEvent>,
) {
    let units = match discover(plugin_dir) {
        Ok(units) => units,
        Err(e) => {
            warn!(error = %e, dir = %plugin_dir.display(), "plugin directory scan failed; poll continues");
            return;
        }
    };

    let mut discovered_names = std::collections::HashSet::new();
    for unit in &units {
        let name = unit.name().to_string();
        discovered_names.insert(name.clone());

        let hash = match hash_unit(unit) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, unit = %name, "failed to hash plugin candidate");
                continue;
            }
        };

        match last_seen.get(&name) {
            None => {
                let _ = events.send(PluginEvent::Load(name.clone()));
            }
            Some(old) if old != &hash => {
                let _ = events.send(PluginEvent::Reload(name.clone()));
            }
            _ => {}
        }
        last_seen.insert(name, hash);
    }

    let removed: Vec<String> = last_seen
        .keys()
        .filter(|name| !discovered_names.contains(*name))
        .cloned()
        .collect();
    for name in removed {
        last_seen.remove(&name);
        let _ = events.send(PluginEvent::Unload(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn observes_add_reload_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = PluginWatcher::spawn(dir.path().to_path_buf(), Duration::from_millis(50));

        let lib = dir.path().join("lkv.so");
        std::fs::write(&lib, b"v1").unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut seen_load = false;
        while Instant::now() < deadline && !seen_load {
            std::thread::sleep(Duration::from_millis(30));
            if watcher
                .drain()
                .iter()
                .any(|e| matches!(e, PluginEvent::Load(name) if name == "lkv"))
            {
                seen_load = true;
            }
        }
        assert!(seen_load, "expected a Load event for a newly created unit");

        std::fs::write(&lib, b"v2 - changed bytes").unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut seen_reload = false;
        while Instant::now() < deadline && !seen_reload {
            std::thread::sleep(Duration::from_millis(30));
            if watcher
                .drain()
                .iter()
                .any(|e| matches!(e, PluginEvent::Reload(name) if name == "lkv"))
            {
                seen_reload = true;
            }
        }
        assert!(seen_reload, "expected a Reload event after content changed");

        std::fs::remove_file(&lib).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut seen_unload = false;
        while Instant::now() < deadline && !seen_unload {
            std::thread::sleep(Duration::from_millis(30));
            if watcher
                .drain()
                .iter()
                .any(|e| matches!(e, PluginEvent::Unload(name) if name == "lkv"))
            {
                seen_unload = true;
            }
        }
        assert!(seen_unload, "expected an Unload event after removal");

        watcher.stop();
    }
}
