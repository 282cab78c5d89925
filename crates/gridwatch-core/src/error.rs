//! Unified error type for the state estimator.
//!
//! Every crate in the workspace converts its local errors into
//! [`GridError`] at its public boundary, matching the error taxonomy of
//! spec §7. Recoverable per-tick conditions (unusable reading, declined
//! prediction, solver divergence) are represented here too, even though
//! most call sites recover from them locally and only log a warning —
//! giving them a variant keeps the taxonomy centralized and lets a caller
//! that does want to propagate do so with `?`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    /// Malformed configuration row, unknown cable type with no fallback,
    /// duplicate node name or key. Fatal at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The reading source could not be opened.
    #[error("reading source unavailable: {0}")]
    SourceUnavailable(String),

    /// The reading source yielded a malformed or incomplete batch.
    #[error("reading source corrupt: {0}")]
    SourceCorrupt(String),

    /// A reading was missing or had non-finite active/reactive power.
    #[error("reading unusable for node {node}: {reason}")]
    ReadingUnusable { node: String, reason: String },

    /// A prediction model declined to predict (or was unavailable).
    #[error("prediction declined for node {node}")]
    ModelDeclined { node: String },

    /// The power-flow solver failed to converge.
    #[error("power flow diverged after {iterations} iterations (max mismatch {max_mismatch})")]
    FlowDiverged {
        iterations: usize,
        max_mismatch: f64,
    },

    /// A plugin failed to load.
    #[error("plugin load failed for '{0}': {1}")]
    PluginLoadFailed(String, String),

    /// A plugin failed to reload; the previous instance was torn down.
    #[error("plugin reload failed for '{0}': {1}")]
    PluginReloadFailed(String, String),

    /// A plugin's ABI did not match the host's expected version.
    #[error("plugin schema mismatch for '{0}': expected abi {expected}, found {found}")]
    PluginSchemaFailed {
        expected: u32,
        found: u32,
        #[allow(dead_code)]
        unit: String,
    },

    /// The subscriber's transport closed.
    #[error("subscriber closed")]
    SubscriberClosed,

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for edges that hand us an `anyhow::Error`.
    #[error("{0}")]
    Other(String),
}

pub type GridResult<T> = Result<T, GridError>;

impl From<anyhow::Error> for GridError {
    fn from(err: anyhow::Error) -> Self {
        GridError::Other(err.to_string())
    }
}

impl From<String> for GridError {
    fn from(s: String) -> Self {
        GridError::Other(s)
    }
}

impl From<&str> for GridError {
    fn from(s: &str) -> Self {
        GridError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_carry_context() {
        let err = GridError::FlowDiverged {
            iterations: 12,
            max_mismatch: 0.045,
        };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("0.045"));
    }

    #[test]
    fn reading_unusable_names_the_node() {
        let err = GridError::ReadingUnusable {
            node: "SUB-14".into(),
            reason: "missing P".into(),
        };
        assert!(err.to_string().contains("SUB-14"));
    }

    #[test]
    fn question_mark_propagates() {
        fn inner() -> GridResult<()> {
            Err(GridError::SubscriberClosed)
        }
        fn outer() -> GridResult<()> {
            inner()?;
            Ok(())
        }
        assert!(outer().is_err());
    }
}
