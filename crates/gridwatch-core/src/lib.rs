//! Units, diagnostics, error taxonomy, the topology model, and the
//! power-flow backend trait shared by every other crate in the workspace.
//!
//! This crate has no I/O of its own (that's `gridwatch-io`) and no
//! knowledge of ticks, subscribers, or plugins (that's `gridwatch-orchestrator`
//! / `gridwatch-plugins`) — it is the pure-data-plus-numerics foundation the
//! rest of the pipeline builds on.

pub mod diagnostics;
pub mod error;
pub mod prediction;
pub mod solver;
pub mod topology;
pub mod units;

pub use error::{GridError, GridResult};
