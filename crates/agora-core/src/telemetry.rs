//! Internal lifecycle events.
//!
//! The hub reports connection and command activity through a
//! [`TelemetrySink`]. Emission is fire-and-forget: a sink must never block
//! or fail the calling path.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::registry::ClientType;

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// A client completed its handshake.
    ClientConnected {
        client_id: String,
        client_type: ClientType,
    },
    /// A client was deregistered.
    ClientDisconnected { client_id: String, reason: String },
    /// A command finished, in any outcome.
    CommandExecuted {
        client_id: String,
        command: String,
        outcome: &'static str,
    },
}

/// Receives lifecycle events.
pub trait TelemetrySink: Send + Sync {
    /// Record one event. Must not block.
    fn emit(&self, event: TelemetryEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::ClientConnected {
                client_id,
                client_type,
            } => {
                debug!(client = %client_id, client_type = %client_type.as_str(), "Client connected");
            }
            TelemetryEvent::ClientDisconnected { client_id, reason } => {
                debug!(client = %client_id, reason = %reason, "Client disconnected");
            }
            TelemetryEvent::CommandExecuted {
                client_id,
                command,
                outcome,
            } => {
                debug!(client = %client_id, command = %command, outcome = %outcome, "Command executed");
            }
        }
    }
}

/// Forwards events to a bounded channel, dropping when full.
pub struct ChannelSink {
    tx: mpsc::Sender<TelemetryEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and its receiving half.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events dropped because the channel was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelSink {
    fn emit(&self, event: TelemetryEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(n: u32) -> TelemetryEvent {
        TelemetryEvent::ClientConnected {
            client_id: format!("cli-{n}"),
            client_type: ClientType::Human,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new(4);

        sink.emit(connected(1));
        sink.emit(connected(2));

        assert_eq!(rx.recv().await, Some(connected(1)));
        assert_eq!(rx.recv().await, Some(connected(2)));
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);

        sink.emit(connected(1));
        sink.emit(connected(2));
        assert_eq!(sink.dropped(), 1);

        assert_eq!(rx.recv().await, Some(connected(1)));
    }
}
