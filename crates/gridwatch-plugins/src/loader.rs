//! Dynamic loading of a single plugin unit (spec §4.4), grounded on
//! `plugin_host.py`'s `load_plugin`/`_instantiate`: resolve the unit's
//! library path, open it, check the declared ABI version, call the entry
//! point, and hand back the boxed instance plus the `libloading::Library`
//! that must outlive it.
//!
//! Operating systems generally lock a loaded shared object's bytes against
//! in-place overwrite, so a reload first copies the unit's current bytes to
//! a fresh generation-numbered path under a scratch directory and loads
//! from there — the standard Rust dynamic-hot-reload technique (SPEC_FULL
//! §4.4).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use libloading::{Library, Symbol};

use gridwatch_core::error::{GridError, GridResult};

use crate::abi::{
    AbiVersionFn, ModelPlugin, PluginEntryFn, PluginHostHandle, ABI_VERSION_SYMBOL, ENTRY_SYMBOL,
    PLUGIN_ABI_VERSION,
};
use crate::discovery::PluginUnit;

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// A loaded plugin: the boxed trait object plus the library it was loaded
/// from. The library must be dropped after the instance (Rust drops struct
/// fields in declaration order, so `instance` is declared first).
pub struct LoadedPlugin {
    pub instance: Box<dyn ModelPlugin>,
    #[allow(dead_code)]
    library: Library,
    pub hash: String,
}

/// Copy `unit`'s library bytes into `scratch_dir` under a fresh
/// generation-numbered name and load it from there, so the original path
/// remains free for the next content change to overwrite.
fn stage_and_open(unit: &PluginUnit, scratch_dir: &Path) -> GridResult<Library> {
    let source = unit.library_path()?;
    std::fs::create_dir_all(scratch_dir)?;

    let generation = GENERATION.fetch_add(1, Ordering::Relaxed);
    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("so");
    let staged_path: PathBuf = scratch_dir.join(format!("{}-{generation}.{extension}", unit.name()));

    std::fs::copy(&source, &staged_path).map_err(|e| {
        GridError::PluginLoadFailed(
            unit.name().to_string(),
            format!("staging {source:?} to {staged_path:?}: {e}"),
        )
    })?;

    unsafe {
        Library::new(&staged_path).map_err(|e| {
            GridError::PluginLoadFailed(unit.name().to_string(), format!("dlopen failed: {e}"))
        })
    }
}

/// Load `unit` from disk, staging it into `scratch_dir`, checking the ABI
/// version, and invoking the entry point with a fresh host handle.
pub fn load_unit(unit: &PluginUnit, scratch_dir: &Path, hash: String) -> GridResult<LoadedPlugin> {
    let library = stage_and_open(unit, scratch_dir)?;

    let found_version = unsafe {
        let version_fn: Symbol<AbiVersionFn> =
            library.get(ABI_VERSION_SYMBOL).map_err(|e| {
                GridError::PluginLoadFailed(
                    unit.name().to_string(),
                    format!("missing '{}' symbol: {e}", String::from_utf8_lossy(ABI_VERSION_SYMBOL)),
                )
            })?;
        version_fn()
    };

    if found_version != PLUGIN_ABI_VERSION {
        return Err(GridError::PluginSchemaFailed {
            expected: PLUGIN_ABI_VERSION,
            found: found_version,
            unit: unit.name().to_string(),
        });
    }

    let instance = unsafe {
        let entry_fn: Symbol<PluginEntryFn> = library.get(ENTRY_SYMBOL).map_err(|e| {
            GridError::PluginLoadFailed(
                unit.name().to_string(),
                format!("missing '{}' symbol: {e}", String::from_utf8_lossy(ENTRY_SYMBOL)),
            )
        })?;
        let host = PluginHostHandle::new();
        let raw = entry_fn(&host as *const PluginHostHandle);
        if raw.is_null() {
            return Err(GridError::PluginLoadFailed(
                unit.name().to_string(),
                "entry point returned a null instance".to_string(),
            ));
        }
        Box::from_raw(raw)
    };

    Ok(LoadedPlugin {
        instance,
        library,
        hash,
    })
}
