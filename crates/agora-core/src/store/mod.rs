//! History persistence behind the bus.
//!
//! Delivery appends accepted messages here and the `history` command reads
//! them back. The backend is pluggable: an in-memory ring for single-process
//! deployments, or an external append-log service for durable history. The
//! bus treats the store as advisory for writes. An unavailable backend never
//! blocks or fails a publish; reads fail visibly instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agora_protocol::Envelope;

use crate::channel::ChannelKey;

mod memory;
mod stream;

pub use memory::MemoryStore;
pub use stream::{StreamConfig, StreamStore};

/// Per-channel monotonically increasing entry sequence number.
pub type SequenceId = u64;

/// A persisted envelope with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEnvelope {
    /// Position in the channel's history, ascending with time.
    pub seq: SequenceId,
    /// The envelope as delivered.
    pub envelope: Envelope,
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable, timed out, or cooling down after a failure.
    #[error("history backend unavailable: {0}")]
    Unavailable(String),

    /// Backend reachable but rejected or garbled the request.
    #[error("history backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Machine-readable code for error envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "BACKEND_UNAVAILABLE",
            StoreError::Backend(_) => "BACKEND_ERROR",
        }
    }
}

/// A history backend.
///
/// Sequence numbers are per-channel and strictly increasing. `history`
/// returns entries newest-first; `before` is an exclusive upper sequence
/// bound for paging.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append an envelope to a channel's history.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the backend rejects the write or is
    /// unavailable. Callers on the publish path log and count the failure
    /// rather than propagate it.
    async fn append(&self, key: &ChannelKey, envelope: &Envelope)
        -> Result<SequenceId, StoreError>;

    /// Read a channel's history, newest entry first.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the backend is unavailable; history
    /// reads fail visibly rather than return partial data.
    async fn history(
        &self,
        key: &ChannelKey,
        limit: usize,
        before: Option<SequenceId>,
    ) -> Result<Vec<StoredEnvelope>, StoreError>;

    /// Drop a channel's history. Called on channel delete.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the backend is unavailable.
    async fn purge(&self, key: &ChannelKey) -> Result<(), StoreError>;

    /// Current availability, without performing I/O.
    fn is_available(&self) -> bool;

    /// Backend name for logs and the `status` command.
    fn name(&self) -> &'static str;
}
