//! The per-subscriber tick orchestrator (spec §4.8): owns one topology, one
//! solver instance, and one reading source, and drives them through the
//! assemble → solve → emit pipeline at a fixed cadence until the subscriber
//! disconnects or an unrecoverable error occurs.

pub mod orchestrator;

pub use orchestrator::{OrchestratorConfig, TickOrchestrator};
