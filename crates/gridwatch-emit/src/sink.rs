//! The subscriber transport (spec §6 "Subscriber transport" /
//! §4.7 "pushed to each subscriber in order"): a `SnapshotSink` trait with
//! an in-process `mpsc` implementation (used by tests and embedding
//! callers) and a WebSocket implementation for real network clients,
//! following the `axum` + `ws` combination documented in DESIGN.md as
//! sourced from the wider retrieval pack rather than the teacher itself.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use thiserror::Error;
use tracing::warn;

use crate::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("subscriber closed")]
    Closed,
    #[error("serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A bidirectional message stream a tick orchestrator pushes snapshots
/// into (spec §6). No inbound messages are interpreted by the core, so
/// the trait only exposes the outbound direction.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn send(&mut self, snapshot: &Snapshot) -> Result<(), SinkError>;
}

/// In-process sink backed by a `tokio::sync::mpsc` channel (spec §5's
/// "awaiting acceptance by the subscriber transport" suspension point),
/// used by tests and by callers embedding the orchestrator directly
/// instead of going over the network.
pub struct MpscSink {
    tx: tokio::sync::mpsc::Sender<Snapshot>,
}

impl MpscSink {
    pub fn new(tx: tokio::sync::mpsc::Sender<Snapshot>) -> MpscSink {
        MpscSink { tx }
    }

    /// Construct a connected sink/receiver pair with the given channel
    /// capacity (the backpressure bound spec §5 relies on).
    pub fn channel(capacity: usize) -> (MpscSink, tokio::sync::mpsc::Receiver<Snapshot>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        (MpscSink { tx }, rx)
    }
}

#[async_trait]
impl SnapshotSink for MpscSink {
    async fn send(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        self.tx
            .send(snapshot.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// WebSocket sink: one per accepted connection, wrapping an
/// `axum::extract::ws::WebSocket` split to its sending half. Outbound
/// messages are textual JSON objects (spec §6).
pub struct WebSocketSink {
    socket: WebSocket,
}

impl WebSocketSink {
    pub fn new(socket: WebSocket) -> WebSocketSink {
        WebSocketSink { socket }
    }
}

#[async_trait]
impl SnapshotSink for WebSocketSink {
    async fn send(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let text = snapshot.to_json()?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| {
                warn!(error = %e, "websocket send failed, treating subscriber as closed");
                SinkError::Closed
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SiteTotalsSnapshot;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            line_data: vec![],
            node_data: vec![],
            site_totals: SiteTotalsSnapshot {
                timestamp: 0,
                active_kw: 0.0,
                reactive_kvar: 0.0,
            },
            diverged: false,
        }
    }

    #[tokio::test]
    async fn mpsc_sink_delivers_to_receiver() {
        let (mut sink, mut rx) = MpscSink::channel(4);
        sink.send(&sample_snapshot()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, sample_snapshot());
    }

    #[tokio::test]
    async fn mpsc_sink_send_after_receiver_dropped_is_closed() {
        let (mut sink, rx) = MpscSink::channel(4);
        drop(rx);
        let result = sink.send(&sample_snapshot()).await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }
}
