//! Ordered envelope validation.
//!
//! [`validate`] runs a fixed sequence of checks over a raw frame and stops
//! at the first failure. Every rejection carries a machine-readable code
//! that travels back to the sender in an `error` envelope; nothing is ever
//! coerced into shape. The module is pure with respect to bus state.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeType};
use crate::ids;
use crate::timestamp::{self, TimestampError};
use crate::version::Version;

/// Bounds applied during validation.
#[derive(Debug, Clone)]
pub struct ValidateLimits {
    /// Maximum accepted size of a raw frame in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ValidateLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// A rejected envelope, carrying the first failed check.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Raw frame exceeds the configured maximum.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Not parseable as the envelope shape.
    #[error("not a valid envelope: {0}")]
    Malformed(String),

    /// Version missing, unparseable, or of an unsupported major.
    #[error("unsupported protocol version {got:?}")]
    UnsupportedVersion { got: String },

    /// Id missing, empty, or not in the generated-id shape.
    #[error("malformed envelope id {got:?}")]
    InvalidId { got: String },

    /// Timestamp missing or outside the single accepted grammar.
    #[error("invalid timestamp {got:?}: {source}")]
    InvalidTimestamp {
        got: String,
        source: TimestampError,
    },

    /// Unrecognized envelope type.
    #[error("unknown envelope type {got:?}")]
    UnknownType { got: String },

    /// Message envelope without a usable room/channel pair.
    #[error("message envelope missing non-empty {field}")]
    MissingRoute { field: &'static str },
}

impl ValidationError {
    /// Machine-readable code for error envelopes and counters.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ValidationError::Malformed(_) => "MALFORMED_ENVELOPE",
            ValidationError::UnsupportedVersion { .. } => "UNSUPPORTED_VERSION",
            ValidationError::InvalidId { .. } => "INVALID_ID",
            ValidationError::InvalidTimestamp { .. } => "INVALID_TIMESTAMP",
            ValidationError::UnknownType { .. } => "UNKNOWN_TYPE",
            ValidationError::MissingRoute { .. } => "MISSING_ROUTE",
        }
    }
}

/// Wire shape before semantic checks. Everything is optional here so each
/// absence is reported by its own check, not as a parse failure.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    room: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    reply_to: Option<String>,
}

/// Validate a raw frame into an [`Envelope`].
///
/// Checks run in a fixed order and short-circuit: frame size, envelope
/// shape, version, id, timestamp, type, routing fields.
///
/// # Errors
///
/// Returns the typed [`ValidationError`] for the first failed check.
pub fn validate(raw: &[u8], limits: &ValidateLimits) -> Result<Envelope, ValidationError> {
    if raw.len() > limits.max_frame_bytes {
        return Err(ValidationError::PayloadTooLarge {
            size: raw.len(),
            max: limits.max_frame_bytes,
        });
    }

    let raw: RawEnvelope =
        serde_json::from_slice(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    let version = raw.version.unwrap_or_default();
    let supported = version
        .parse::<Version>()
        .map(|v| v.is_supported())
        .unwrap_or(false);
    if !supported {
        return Err(ValidationError::UnsupportedVersion { got: version });
    }

    let id = raw.id.unwrap_or_default();
    if !ids::is_well_formed(&id) {
        return Err(ValidationError::InvalidId { got: id });
    }

    let ts = raw.timestamp.unwrap_or_default();
    if let Err(source) = timestamp::parse(&ts) {
        return Err(ValidationError::InvalidTimestamp { got: ts, source });
    }

    let kind_name = raw.kind.unwrap_or_default();
    let Some(kind) = EnvelopeType::parse(&kind_name) else {
        return Err(ValidationError::UnknownType { got: kind_name });
    };

    let room = non_empty(raw.room);
    let channel = non_empty(raw.channel);
    if kind == EnvelopeType::Message {
        if room.is_none() {
            return Err(ValidationError::MissingRoute { field: "room" });
        }
        if channel.is_none() {
            return Err(ValidationError::MissingRoute { field: "channel" });
        }
    }

    Ok(Envelope {
        id,
        version,
        kind,
        room,
        channel,
        from: raw.from,
        timestamp: ts,
        payload: raw.payload,
        args: raw.args,
        metadata: raw.metadata,
        reply_to: raw.reply_to,
    })
}

/// Empty strings count as absent for routing purposes.
fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}
