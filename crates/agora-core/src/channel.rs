//! Channel keys and per-channel state.
//!
//! A channel is addressed by its `room:channel` key and owns nothing but a
//! membership set and descriptive metadata. Fan-out goes through per-client
//! send queues, so channel state stays small and cheap to snapshot.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agora_protocol::timestamp;

/// Maximum length of a room or channel identifier.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate a room or channel identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_identifier(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("identifier cannot be empty");
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err("identifier too long");
    }
    if name.starts_with('$') {
        return Err("identifiers starting with '$' are reserved");
    }
    if name.contains(':') {
        return Err("identifier cannot contain ':'");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("identifier contains invalid characters");
    }
    Ok(())
}

/// The `room:channel` routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    /// Room half of the key.
    pub room: String,
    /// Channel half of the key.
    pub channel: String,
}

impl ChannelKey {
    /// Create a key from its halves.
    #[must_use]
    pub fn new(room: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room, self.channel)
    }
}

/// Options for channel creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Fail with `ALREADY_EXISTS` instead of returning the existing channel.
    pub strict: bool,
    /// Opaque metadata stored on the channel.
    pub metadata: Value,
}

/// Public snapshot of a channel, returned by commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Room half of the key.
    pub room: String,
    /// Channel half of the key.
    pub channel: String,
    /// Creation time in wire timestamp format.
    pub created_at: String,
    /// Number of currently subscribed clients.
    pub member_count: usize,
    /// Opaque metadata supplied at creation.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Membership and metadata for one channel.
#[derive(Debug)]
pub struct ChannelState {
    /// Subscribed client ids.
    members: HashSet<String>,
    /// Creation time in wire timestamp format.
    created_at: String,
    /// Opaque metadata supplied at creation.
    metadata: Value,
}

impl ChannelState {
    /// Create empty channel state.
    #[must_use]
    pub fn new(metadata: Value) -> Self {
        Self {
            members: HashSet::new(),
            created_at: timestamp::now(),
            metadata,
        }
    }

    /// Add a member. Returns `false` if already subscribed.
    pub fn join(&mut self, client_id: impl Into<String>) -> bool {
        self.members.insert(client_id.into())
    }

    /// Remove a member. Returns `false` if not subscribed.
    pub fn leave(&mut self, client_id: &str) -> bool {
        self.members.remove(client_id)
    }

    /// Check if a client is subscribed.
    #[must_use]
    pub fn is_member(&self, client_id: &str) -> bool {
        self.members.contains(client_id)
    }

    /// Number of subscribed clients.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if the channel has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Snapshot the member set.
    #[must_use]
    pub fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    /// Drain the member set, leaving it empty.
    pub fn drain_members(&mut self) -> Vec<String> {
        self.members.drain().collect()
    }

    /// Build the public descriptor for this channel.
    #[must_use]
    pub fn descriptor(&self, key: &ChannelKey) -> ChannelDescriptor {
        ChannelDescriptor {
            room: key.room.clone(),
            channel: key.channel.clone(),
            created_at: self.created_at.clone(),
            member_count: self.members.len(),
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_display() {
        let key = ChannelKey::new("science", "general");
        assert_eq!(key.to_string(), "science:general");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("general").is_ok());
        assert!(validate_identifier("deep-sea_2").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("$system").is_err());
        assert!(validate_identifier("a:b").is_err());
        assert!(validate_identifier("caf\u{e9}").is_err());

        let long = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(validate_identifier(&long).is_err());
    }

    #[test]
    fn test_membership() {
        let mut state = ChannelState::new(Value::Null);

        assert!(state.join("cli-a"));
        assert!(!state.join("cli-a"));
        assert!(state.join("cli-b"));
        assert_eq!(state.member_count(), 2);
        assert!(state.is_member("cli-a"));

        assert!(state.leave("cli-a"));
        assert!(!state.leave("cli-a"));
        assert_eq!(state.member_count(), 1);
    }

    #[test]
    fn test_descriptor_carries_metadata() {
        let mut state = ChannelState::new(json!({"purpose": "testing"}));
        state.join("cli-a");

        let descriptor = state.descriptor(&ChannelKey::new("science", "general"));
        assert_eq!(descriptor.room, "science");
        assert_eq!(descriptor.channel, "general");
        assert_eq!(descriptor.member_count, 1);
        assert_eq!(descriptor.metadata, json!({"purpose": "testing"}));
    }

    #[test]
    fn test_drain_empties_membership() {
        let mut state = ChannelState::new(Value::Null);
        state.join("cli-a");
        state.join("cli-b");

        let mut drained = state.drain_members();
        drained.sort();
        assert_eq!(drained, vec!["cli-a".to_string(), "cli-b".to_string()]);
        assert!(state.is_empty());
    }
}
