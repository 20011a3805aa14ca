//! The versioned message envelope exchanged over the wire.
//!
//! Every frame on the bus is one JSON envelope. Chat traffic, commands,
//! command responses, errors, and telemetry all share the same shape and
//! differ only in `type` and in which optional fields they populate.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ids;
use crate::timestamp;
use crate::version::PROTOCOL_VERSION;

/// Sender id stamped on server-originated envelopes.
pub const SERVER_SENDER: &str = "server";

/// Envelope kinds recognized by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// A payload fanned out to the subscribers of `room:channel`.
    Message,
    /// An administrative request addressed to the server.
    Command,
    /// The server's reply to a command.
    CommandResponse,
    /// A failure report.
    Error,
    /// Activity events; routable when they carry a room and channel.
    Telemetry,
}

impl EnvelopeType {
    /// Wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::Message => "message",
            EnvelopeType::Command => "command",
            EnvelopeType::CommandResponse => "command_response",
            EnvelopeType::Error => "error",
            EnvelopeType::Telemetry => "telemetry",
        }
    }

    /// Parse a wire name into a type, if recognized.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "message" => Some(EnvelopeType::Message),
            "command" => Some(EnvelopeType::Command),
            "command_response" => Some(EnvelopeType::CommandResponse),
            "error" => Some(EnvelopeType::Error),
            "telemetry" => Some(EnvelopeType::Telemetry),
            _ => None,
        }
    }
}

/// A single wire envelope.
///
/// The JSON shape is:
///
/// ```json
/// { "id": "msg-0198c2f40e5d-9f21aa07", "version": "1.0",
///   "type": "message", "room": "science", "channel": "general",
///   "from": "cli-0198c2f19c00-55013c2e",
///   "timestamp": "2026-03-01T17:04:05.120+00:00",
///   "payload": {"text": "hello"} }
/// ```
///
/// `room`/`channel` form the routing key and are mandatory for `message`
/// envelopes. For `command` envelopes, `payload` is a string naming the
/// command and `args` carries its arguments. Responses reuse the request id
/// in `reply_to`. Unknown JSON keys are tolerated on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Globally unique id in the `prefix-time-random` shape.
    pub id: String,

    /// Protocol version string, `"MAJOR.MINOR"`.
    pub version: String,

    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeType,

    /// Target room; with `channel`, forms the routing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,

    /// Target channel within the room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Sender client id. The server stamps this on delivery and on its own
    /// envelopes; values supplied by clients are overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Creation time in the accepted grammar (see [`crate::timestamp`]).
    pub timestamp: String,

    /// Structured payload; for commands, the command name string.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,

    /// Command arguments.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,

    /// Opaque metadata; the bus routes around it without reading it.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,

    /// Id of the request this envelope answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Envelope {
    fn base(kind: EnvelopeType, id_prefix: &str) -> Self {
        Self {
            id: ids::generate(id_prefix),
            version: PROTOCOL_VERSION.to_string(),
            kind,
            room: None,
            channel: None,
            from: None,
            timestamp: timestamp::now(),
            payload: Value::Null,
            args: Value::Null,
            metadata: Value::Null,
            reply_to: None,
        }
    }

    /// Build a message bound for `room:channel`.
    #[must_use]
    pub fn message(room: impl Into<String>, channel: impl Into<String>, payload: Value) -> Self {
        let mut envelope = Self::base(EnvelopeType::Message, ids::MESSAGE_PREFIX);
        envelope.room = Some(room.into());
        envelope.channel = Some(channel.into());
        envelope.payload = payload;
        envelope
    }

    /// Build a command request. The name travels in `payload`, the
    /// arguments in `args`.
    #[must_use]
    pub fn command(name: impl Into<String>, args: Value) -> Self {
        let mut envelope = Self::base(EnvelopeType::Command, ids::COMMAND_PREFIX);
        envelope.payload = Value::String(name.into());
        envelope.args = args;
        envelope
    }

    /// Build a server response to the request with id `reply_to`.
    #[must_use]
    pub fn command_response(reply_to: impl Into<String>, payload: Value) -> Self {
        let mut envelope = Self::base(EnvelopeType::CommandResponse, ids::RESPONSE_PREFIX);
        envelope.from = Some(SERVER_SENDER.to_string());
        envelope.reply_to = Some(reply_to.into());
        envelope.payload = payload;
        envelope
    }

    /// Build a server error envelope carrying a machine-readable code.
    #[must_use]
    pub fn error_reply(reply_to: Option<&str>, code: &str, message: &str) -> Self {
        let mut envelope = Self::base(EnvelopeType::Error, ids::ERROR_PREFIX);
        envelope.from = Some(SERVER_SENDER.to_string());
        envelope.reply_to = reply_to.map(str::to_string);
        envelope.payload = json!({ "code": code, "message": message });
        envelope
    }

    /// Build a server telemetry notice. `fields` must be a JSON object;
    /// the event name is inserted under `"event"`.
    #[must_use]
    pub fn telemetry(event: &str, fields: Value) -> Self {
        let mut envelope = Self::base(EnvelopeType::Telemetry, ids::TELEMETRY_PREFIX);
        envelope.from = Some(SERVER_SENDER.to_string());
        envelope.payload = match fields {
            Value::Object(mut map) => {
                map.insert("event".to_string(), Value::String(event.to_string()));
                Value::Object(map)
            }
            other => json!({ "event": event, "data": other }),
        };
        envelope
    }

    /// Set the sender id.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the routing key.
    #[must_use]
    pub fn with_route(mut self, room: impl Into<String>, channel: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self.channel = Some(channel.into());
        self
    }

    /// Set the opaque metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Command name carried by a `command` envelope, if any.
    #[must_use]
    pub fn command_name(&self) -> Option<&str> {
        match (&self.kind, &self.payload) {
            (EnvelopeType::Command, Value::String(name)) => Some(name),
            _ => None,
        }
    }

    /// Routing key as a `(room, channel)` pair, when both are present and
    /// non-empty.
    #[must_use]
    pub fn route(&self) -> Option<(&str, &str)> {
        match (self.room.as_deref(), self.channel.as_deref()) {
            (Some(room), Some(channel)) if !room.is_empty() && !channel.is_empty() => {
                Some((room, channel))
            }
            _ => None,
        }
    }

    /// Serialize to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized (non-string
    /// map keys and the like).
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
