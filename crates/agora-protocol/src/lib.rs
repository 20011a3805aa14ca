//! # agora-protocol
//!
//! Wire protocol definitions for the Agora realtime message bus.
//!
//! This crate defines the JSON envelope exchanged between Agora clients and
//! servers: the envelope shape itself, id generation, the timestamp grammar,
//! protocol versioning, and the ordered validation pipeline every inbound
//! frame passes through.
//!
//! ## Envelope Types
//!
//! - `message` - Payload fan-out to a room/channel
//! - `command` - Request for a server-side operation
//! - `command_response` / `error` - Correlated replies from the server
//! - `telemetry` - Server-originated lifecycle events
//!
//! ## Example
//!
//! ```rust
//! use agora_protocol::{validate, Envelope, ValidateLimits};
//! use serde_json::json;
//!
//! // Build a message envelope with the helper constructor
//! let envelope = Envelope::message("science", "general", json!({"text": "hi"}));
//!
//! // Encode and re-validate
//! let encoded = envelope.to_bytes().unwrap();
//! let decoded = validate(&encoded, &ValidateLimits::default()).unwrap();
//! assert_eq!(decoded, envelope);
//! ```

pub mod envelope;
pub mod ids;
pub mod timestamp;
pub mod validate;
pub mod version;

pub use envelope::{Envelope, EnvelopeType, SERVER_SENDER};
pub use validate::{validate, ValidateLimits, ValidationError};
pub use version::{Version, PROTOCOL_VERSION};
