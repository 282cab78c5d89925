//! Two-state Markov link-reliability model (spec §4.3), condensed from
//! `original_source/server/network.py`'s `GilbertElliottSimulator`.
//!
//! Draw order matters for reproducibility: the loss check is drawn first,
//! then the state transition, exactly mirroring `should_drop`'s body —
//! swapping the order would still be "a Gilbert-Elliott model" but would
//! desynchronize replay against a fixed seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Good,
    Bad,
}

/// Configured transition/loss probabilities (spec §4.3 defaults).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GilbertElliottParams {
    pub p_good_to_bad: f64,
    pub p_bad_to_good: f64,
    pub p_loss_good: f64,
    pub p_loss_bad: f64,
}

impl Default for GilbertElliottParams {
    fn default() -> Self {
        GilbertElliottParams {
            p_good_to_bad: 0.04,
            p_bad_to_good: 0.3,
            p_loss_good: 0.01,
            p_loss_bad: 0.9,
        }
    }
}

/// Per-node simulator instance. Seeded from the node's integer key so a
/// given topology always replays the same drop sequence.
pub struct GilbertElliottSimulator {
    params: GilbertElliottParams,
    state: LinkState,
    rng: StdRng,
}

impl GilbertElliottSimulator {
    pub fn new(node_key: u32, params: GilbertElliottParams) -> Self {
        GilbertElliottSimulator {
            params,
            state: LinkState::Good,
            rng: StdRng::seed_from_u64(node_key as u64),
        }
    }

    pub fn with_default_params(node_key: u32) -> Self {
        Self::new(node_key, GilbertElliottParams::default())
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Draw the loss decision and advance the Markov state (spec §4.3
    /// steps 1-3).
    pub fn decide_drop(&mut self) -> bool {
        let u1: f64 = self.rng.gen();
        let lost = match self.state {
            LinkState::Good => u1 < self.params.p_loss_good,
            LinkState::Bad => u1 < self.params.p_loss_bad,
        };

        let u2: f64 = self.rng.gen();
        self.state = match self.state {
            LinkState::Good if u2 < self.params.p_good_to_bad => LinkState::Bad,
            LinkState::Bad if u2 < self.params.p_bad_to_good => LinkState::Good,
            other => other,
        };

        lost
    }
}
