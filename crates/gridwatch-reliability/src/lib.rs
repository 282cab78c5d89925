//! Per-link channel reliability simulation (spec §4.3), used only when the
//! tick orchestrator runs in `simulate_network` mode instead of replaying
//! readings from a real data source.

pub mod gilbert_elliott;

pub use gilbert_elliott::{GilbertElliottParams, GilbertElliottSimulator, LinkState};
