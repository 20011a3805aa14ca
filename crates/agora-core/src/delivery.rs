//! Fan-out of one envelope to every subscriber of a channel.
//!
//! The envelope is encoded exactly once; each subscriber queue receives a
//! cheap clone of the same byte buffer. History persistence happens before
//! fan-out but never blocks it: a failing store is counted and logged, and
//! delivery proceeds without a sequence number.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use thiserror::Error;
use tracing::{trace, warn};

use agora_protocol::{Envelope, EnvelopeType};

use crate::channel::ChannelKey;
use crate::hub::Hub;
use crate::registry::{ClientHandle, EnqueueOutcome};
use crate::routing::RoutingError;
use crate::store::SequenceId;

/// Failure to route an envelope anywhere at all. Per-subscriber drops are
/// not errors; they are reported in the [`DeliveryReport`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Stable error code, mirrored into error reply payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Routing(e) => e.code(),
            Self::Encode(_) => "INTERNAL",
        }
    }
}

/// What happened to one delivered envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscriber queues that accepted the frame.
    pub delivered: usize,
    /// Subscribers skipped or overflowed.
    pub dropped: usize,
    /// Sequence assigned by the history store, when persistence succeeded.
    pub persisted: Option<SequenceId>,
}

/// Deliver `envelope` to every member of `key`, stamping the sender.
pub(crate) async fn deliver(
    hub: &Hub,
    sender: &Arc<ClientHandle>,
    key: &ChannelKey,
    mut envelope: Envelope,
) -> Result<DeliveryReport, DeliveryError> {
    envelope.from = Some(sender.id().to_string());

    let members = hub.routing.resolve_for_publish(key)?;

    let persisted = if envelope.kind == EnvelopeType::Message {
        match hub.store.append(key, &envelope).await {
            Ok(seq) => Some(seq),
            Err(e) => {
                hub.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %key, error = %e, "History append failed; delivering anyway");
                None
            }
        }
    } else {
        None
    };

    let bytes = envelope.to_bytes()?;

    let mut delivered = 0;
    let mut dropped = 0;
    for client_id in &members {
        let Some(member) = hub.registry.get(client_id) else {
            // Membership can outlive the registry entry for the duration of
            // a disconnect; skip.
            dropped += 1;
            hub.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        let outcome = member.queue().push(bytes.clone());
        if outcome.dropped_frame() {
            hub.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        match outcome {
            EnqueueOutcome::Queued | EnqueueOutcome::DroppedOldest => delivered += 1,
            _ => dropped += 1,
        }
    }

    trace!(
        channel = %key,
        members = members.len(),
        delivered,
        dropped,
        seq = ?persisted,
        "Fanned out envelope"
    );

    Ok(DeliveryReport {
        delivered,
        dropped,
        persisted,
    })
}
