//! The prediction-model plugin host (spec §4.4): discovery, content
//! hashing, hot reload over `libloading`, a background directory watcher,
//! and a typed capability registry the load assembler queries by tag.

pub mod abi;
pub mod adapter;
pub mod discovery;
pub mod hashing;
pub mod host;
pub mod loader;
pub mod watcher;

pub use abi::{ModelPlugin, Plugin, PluginHostHandle, PluginType};
pub use host::{PluginHost, PluginHostConfig};
pub use watcher::PluginEvent;
