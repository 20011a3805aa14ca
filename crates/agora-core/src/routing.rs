//! Room and channel routing table.
//!
//! The table maps `room:channel` keys to membership state and tracks which
//! channels each room contains. All mutation goes through the command
//! dispatcher or the disconnect path; delivery only reads snapshots.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::channel::{validate_identifier, ChannelDescriptor, ChannelKey, ChannelState, CreateOptions};

/// Routing errors.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Invalid room or channel identifier.
    #[error("invalid identifier: {0}")]
    InvalidName(&'static str),

    /// Channel or room not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Channel already exists (strict creation).
    #[error("channel already exists: {0}")]
    AlreadyExists(String),

    /// A configured cap was hit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl RoutingError {
    /// Machine-readable code for error envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            RoutingError::InvalidName(_) => "INVALID_NAME",
            RoutingError::NotFound(_) => "NOT_FOUND",
            RoutingError::AlreadyExists(_) => "ALREADY_EXISTS",
            RoutingError::LimitExceeded(_) => "LIMIT_EXCEEDED",
        }
    }
}

/// A room seeded from configuration. System rooms survive their last
/// channel and are never auto-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRoom {
    /// Room name.
    pub room: String,
    /// Channels created at startup.
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Routing table configuration.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Maximum number of channels across all rooms.
    pub max_channels: usize,
    /// Maximum subscriptions one client may hold.
    pub max_subscriptions_per_client: usize,
    /// Whether `join_channel` creates missing channels.
    pub auto_create_on_join: bool,
    /// Whether publishing creates missing channels.
    pub auto_create_on_publish: bool,
    /// Whether channels are deleted when their last member leaves.
    pub auto_delete_empty: bool,
    /// Rooms created at startup and pinned.
    pub system_rooms: Vec<SystemRoom>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
            max_subscriptions_per_client: 100,
            auto_create_on_join: true,
            auto_create_on_publish: false,
            auto_delete_empty: true,
            system_rooms: Vec::new(),
        }
    }
}

/// Per-room entry: the set of channel names, plus the system pin.
#[derive(Default)]
struct RoomEntry {
    channels: DashSet<String>,
    system: bool,
}

/// The routing table.
///
/// Keys shard across the underlying maps, so unrelated channels never
/// serialize against each other. Lock discipline: a guard on `channels` may
/// be held while touching `rooms`, never the other way around.
pub struct RoutingTable {
    channels: DashMap<ChannelKey, ChannelState>,
    rooms: DashMap<String, RoomEntry>,
    config: RoutingConfig,
}

impl RoutingTable {
    /// Create a table and seed the configured system rooms.
    #[must_use]
    pub fn new(config: RoutingConfig) -> Self {
        let table = Self {
            channels: DashMap::new(),
            rooms: DashMap::new(),
            config,
        };

        for system in table.config.system_rooms.clone() {
            table.rooms.entry(system.room.clone()).or_default().system = true;
            for channel in &system.channels {
                if let Err(e) = table.create_channel(&system.room, channel, CreateOptions::default())
                {
                    debug!(room = %system.room, channel = %channel, error = %e, "Skipping system channel");
                }
            }
        }

        table
    }

    /// Create a channel.
    ///
    /// Creation is idempotent: an existing channel is returned as-is unless
    /// `opts.strict` is set. The room is created implicitly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName`, `AlreadyExists` (strict), or `LimitExceeded`.
    pub fn create_channel(
        &self,
        room: &str,
        channel: &str,
        opts: CreateOptions,
    ) -> Result<ChannelDescriptor, RoutingError> {
        validate_identifier(room).map_err(RoutingError::InvalidName)?;
        validate_identifier(channel).map_err(RoutingError::InvalidName)?;

        let key = ChannelKey::new(room, channel);

        if self.channels.len() >= self.config.max_channels && !self.channels.contains_key(&key) {
            return Err(RoutingError::LimitExceeded("max channels reached"));
        }

        let descriptor = match self.channels.entry(key.clone()) {
            Entry::Occupied(entry) => {
                if opts.strict {
                    return Err(RoutingError::AlreadyExists(key.to_string()));
                }
                return Ok(entry.get().descriptor(&key));
            }
            Entry::Vacant(slot) => {
                let state = ChannelState::new(opts.metadata);
                let descriptor = state.descriptor(&key);
                slot.insert(state);
                descriptor
            }
        };

        self.rooms
            .entry(key.room.clone())
            .or_default()
            .channels
            .insert(key.channel.clone());

        debug!(channel = %key, "Created channel");
        Ok(descriptor)
    }

    /// Delete a channel, returning the evicted member ids.
    ///
    /// The removal is atomic: once this returns, no membership read observes
    /// the channel. A non-system room is dropped with its last channel.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the channel does not exist.
    pub fn delete_channel(&self, key: &ChannelKey) -> Result<Vec<String>, RoutingError> {
        let (key, mut state) = self
            .channels
            .remove(key)
            .ok_or_else(|| RoutingError::NotFound(key.to_string()))?;

        let evicted = state.drain_members();
        self.remove_from_room(&key);

        debug!(channel = %key, evicted = evicted.len(), "Deleted channel");
        Ok(evicted)
    }

    /// Subscribe a client to a channel, creating it when policy allows.
    ///
    /// Joining a channel the client already belongs to is a no-op and
    /// returns the current descriptor.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the channel is missing and auto-creation on
    /// join is disabled.
    pub fn subscribe(
        &self,
        key: &ChannelKey,
        client_id: &str,
    ) -> Result<ChannelDescriptor, RoutingError> {
        if !self.channels.contains_key(key) {
            if !self.config.auto_create_on_join {
                return Err(RoutingError::NotFound(key.to_string()));
            }
            self.create_channel(&key.room, &key.channel, CreateOptions::default())?;
        }

        let mut state = self
            .channels
            .get_mut(key)
            .ok_or_else(|| RoutingError::NotFound(key.to_string()))?;
        state.join(client_id);

        debug!(channel = %key, client = %client_id, members = state.member_count(), "Subscribed");
        Ok(state.descriptor(key))
    }

    /// Unsubscribe a client from a channel.
    ///
    /// Returns whether the client was a member. Empty non-system channels
    /// are dropped when auto-delete is enabled.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the channel does not exist.
    pub fn unsubscribe(&self, key: &ChannelKey, client_id: &str) -> Result<bool, RoutingError> {
        let (removed, now_empty) = {
            let mut state = self
                .channels
                .get_mut(key)
                .ok_or_else(|| RoutingError::NotFound(key.to_string()))?;
            let removed = state.leave(client_id);
            (removed, state.is_empty())
        };

        if removed {
            debug!(channel = %key, client = %client_id, "Unsubscribed");
        }

        if now_empty && self.config.auto_delete_empty && !self.is_system_room(&key.room) {
            // Re-checked under the shard lock; a concurrent join wins.
            if self.channels.remove_if(key, |_, s| s.is_empty()).is_some() {
                self.remove_from_room(key);
                debug!(channel = %key, "Deleted empty channel");
            }
        }

        Ok(removed)
    }

    /// Snapshot the member ids of a channel.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the channel does not exist.
    pub fn members(&self, key: &ChannelKey) -> Result<Vec<String>, RoutingError> {
        self.channels
            .get(key)
            .map(|state| state.members())
            .ok_or_else(|| RoutingError::NotFound(key.to_string()))
    }

    /// Resolve the member set for a publish, creating the channel when the
    /// publish auto-creation policy allows.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the channel is missing and auto-creation on
    /// publish is disabled.
    pub fn resolve_for_publish(&self, key: &ChannelKey) -> Result<Vec<String>, RoutingError> {
        if let Some(state) = self.channels.get(key) {
            return Ok(state.members());
        }
        if !self.config.auto_create_on_publish {
            return Err(RoutingError::NotFound(key.to_string()));
        }
        self.create_channel(&key.room, &key.channel, CreateOptions::default())?;
        Ok(self
            .channels
            .get(key)
            .map(|state| state.members())
            .unwrap_or_default())
    }

    /// List the channels of a room, ordered by channel name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the room does not exist.
    pub fn list_channels(&self, room: &str) -> Result<Vec<ChannelDescriptor>, RoutingError> {
        let names: Vec<String> = {
            let entry = self
                .rooms
                .get(room)
                .ok_or_else(|| RoutingError::NotFound(room.to_string()))?;
            entry.channels.iter().map(|c| c.clone()).collect()
        };

        let mut names = names;
        names.sort();

        Ok(names
            .iter()
            .filter_map(|channel| {
                let key = ChannelKey::new(room, channel);
                self.channels.get(&key).map(|state| state.descriptor(&key))
            })
            .collect())
    }

    /// Describe a single channel.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the channel does not exist.
    pub fn channel_info(&self, key: &ChannelKey) -> Result<ChannelDescriptor, RoutingError> {
        self.channels
            .get(key)
            .map(|state| state.descriptor(key))
            .ok_or_else(|| RoutingError::NotFound(key.to_string()))
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.channels.contains_key(key)
    }

    /// Number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of channels across all rooms.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Total memberships across all channels.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.channels.iter().map(|state| state.member_count()).sum()
    }

    fn is_system_room(&self, room: &str) -> bool {
        self.rooms.get(room).map_or(false, |entry| entry.system)
    }

    /// Drop a channel name from its room, and the room itself once it holds
    /// no channels (system rooms stay).
    fn remove_from_room(&self, key: &ChannelKey) {
        if let Some(entry) = self.rooms.get(&key.room) {
            entry.channels.remove(&key.channel);
        }
        self.rooms
            .remove_if(&key.room, |_, entry| entry.channels.is_empty() && !entry.system);
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(RoutingConfig::default())
    }
}
