//! The prediction-model capability as seen by the core (spec §3): just
//! enough surface for the load assembler to ask "what would this node be
//! doing right now" without knowing anything about plugin loading,
//! hashing, or hot reload — that's `gridwatch-plugins`' job.

use crate::units::{Megavars, Megawatts};

/// A single `(P, Q)` prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedLoad {
    pub p_mw: Megawatts,
    pub q_mvar: Megavars,
}

/// One history entry as seen by a model: an epoch-second timestamp plus
/// the observed (P, Q).
pub type HistoryEntry = (i64, Megawatts, Megavars);

/// Capability set exposed by a loaded prediction-model plugin (spec §3/§4.4
/// `MODEL` schema: `predict_next` and `get_formatted_name`).
pub trait PredictionModel: Send + Sync {
    /// Stable identifier used for registry lookups and logging.
    fn id(&self) -> &str;

    /// Human-readable display name (spec's `get_formatted_name`).
    fn formatted_name(&self) -> String;

    /// Predict the next `(P, Q)` from history, most recent last. Returns
    /// `None` when history is insufficient for this model.
    fn predict_next(&self, history: &[HistoryEntry]) -> Option<PredictedLoad>;
}
