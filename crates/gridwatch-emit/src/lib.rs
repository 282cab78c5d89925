//! Snapshot serialisation (spec §4.7) and the subscriber transport
//! abstraction (spec §6) the tick orchestrator pushes snapshots through.

pub mod sink;
pub mod snapshot;

pub use sink::{MpscSink, SinkError, SnapshotSink, WebSocketSink};
pub use snapshot::{LineSnapshot, NodeSnapshot, SiteTotalsSnapshot, Snapshot};
