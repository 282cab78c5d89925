//! The published plugin ABI (spec §6 "Plugin surface"). Every `cdylib`
//! plugin unit under `plugin-models/*` links against this module's types
//! and exports the two symbols the host looks for.
//!
//! There is no runtime duck-typing to fall back on in Rust the way the
//! original's `__type_schema_check` does with `hasattr`, so the "schema
//! check" collapses entirely to the ABI-version compare below plus the
//! static `ModelPlugin` trait bound the entry point's return type already
//! enforces at compile time.

use gridwatch_core::error::GridResult;

/// Bumped whenever `ModelPlugin`'s method set changes in a
/// backwards-incompatible way. A plugin built against a different version
/// is refused at load time rather than invoked with a mismatched vtable.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Opaque handle passed to a plugin's entry point. Carries nothing today;
/// its presence in the FFI signature is what lets a future host version
/// pass capabilities (a logger, an event-emission channel) to plugins
/// without breaking the symbol signature itself.
#[repr(C)]
pub struct PluginHostHandle {
    _private: (),
}

impl PluginHostHandle {
    pub fn new() -> Self {
        PluginHostHandle { _private: () }
    }
}

impl Default for PluginHostHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// What a loaded plugin declares itself to be (spec's `get_type()`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginType {
    Model,
    Other(String),
}

/// Base capability every plugin instance exposes regardless of type.
///
/// `Sync` is required (not just `Send`) because loaded instances are shared
/// across orchestrator tasks behind an `Arc` (spec §5: readers capture a
/// handle to the current registry snapshot rather than locking per call).
pub trait Plugin: Send + Sync {
    fn register(&mut self) -> GridResult<()>;
    fn deregister(&mut self) -> GridResult<()>;
    fn get_type(&self) -> PluginType;
}

/// The `MODEL` schema (spec §4.4): `predict_next` plus a display name.
/// History entries are `(unix_timestamp, p_mw, q_mvar)`; across the FFI
/// boundary these stay plain `f64` tuples rather than the host's newtypes,
/// since a `cdylib` built independently of `gridwatch-core` can't share its
/// `#[repr(transparent)]` wrapper types without also depending on that
/// crate (which the reference plugins do, for convenience, but the ABI
/// itself should not require it).
pub trait ModelPlugin: Plugin {
    fn predict_next(&self, history: &[(i64, f64, f64)]) -> Option<(f64, f64)>;
    fn get_formatted_name(&self) -> String;
}

/// Signature of the exported `gridwatch_plugin_abi_version` symbol.
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

/// Signature of the exported `gridwatch_plugin_entry` symbol. Returns a
/// boxed trait object as a raw fat pointer, reclaimed by the host via
/// `Box::from_raw` on unload.
pub type PluginEntryFn = unsafe extern "C" fn(host: *const PluginHostHandle) -> *mut dyn ModelPlugin;

pub const ABI_VERSION_SYMBOL: &[u8] = b"gridwatch_plugin_abi_version";
pub const ENTRY_SYMBOL: &[u8] = b"gridwatch_plugin_entry";
