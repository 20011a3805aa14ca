//! Connected clients and their bounded send queues.
//!
//! Every client owns one [`SendQueue`]. Delivery pushes pre-encoded frames
//! into it; the connection's writer task drains it to the socket. The queue
//! is bounded with an explicit overflow policy, so a slow consumer can never
//! hold memory hostage, and every dropped frame is observable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

use agora_protocol::{ids, timestamp};

use crate::channel::{validate_identifier, ChannelKey};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A client with this id is already connected.
    #[error("client already connected: {0}")]
    DuplicateClient(String),

    /// Connection cap reached.
    #[error("connection limit reached")]
    LimitExceeded,

    /// Supplied client id fails identifier rules.
    #[error("invalid client id: {0}")]
    InvalidClientId(&'static str),
}

impl RegistryError {
    /// Machine-readable code for error envelopes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::DuplicateClient(_) => "DUPLICATE_CLIENT",
            RegistryError::LimitExceeded => "LIMIT_EXCEEDED",
            RegistryError::InvalidClientId(_) => "INVALID_ID",
        }
    }
}

/// Kind of connected client. Types differ in metadata and default
/// capabilities, never in routing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientType {
    Human,
    AiAgent,
    Dashboard,
    Service,
}

impl ClientType {
    /// Wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Human => "human",
            ClientType::AiAgent => "ai-agent",
            ClientType::Dashboard => "dashboard",
            ClientType::Service => "service",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "human" => Some(ClientType::Human),
            "ai-agent" => Some(ClientType::AiAgent),
            "dashboard" => Some(ClientType::Dashboard),
            "service" => Some(ClientType::Service),
            _ => None,
        }
    }
}

impl Default for ClientType {
    fn default() -> Self {
        ClientType::Human
    }
}

/// Policy applied when a send queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room.
    DropOldest,
    /// Discard the incoming frame.
    DropNewest,
    /// Close the connection.
    Disconnect,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// An item queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A pre-encoded wire frame.
    Frame(Bytes),
    /// Server-initiated close with a reason. Jumps the queue.
    Close(String),
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame queued.
    Queued,
    /// Frame queued after evicting the oldest entry.
    DroppedOldest,
    /// Incoming frame discarded.
    DroppedNewest,
    /// Queue full under the disconnect policy; a close was queued.
    Disconnecting,
    /// Queue already terminal; frame discarded.
    RejectedClosed,
}

impl EnqueueOutcome {
    /// Whether a frame was lost in this outcome.
    #[must_use]
    pub fn dropped_frame(&self) -> bool {
        !matches!(self, EnqueueOutcome::Queued)
    }
}

struct QueueInner {
    items: VecDeque<Outbound>,
    /// Set once a close is queued; no further frames are accepted.
    closing: bool,
    /// Set once the close has been yielded to the writer.
    terminal: bool,
}

/// Bounded frame queue between delivery and one connection's writer task.
pub struct SendQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl SendQueue {
    /// Create a queue with the given capacity and overflow policy.
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(64)),
                closing: false,
                terminal: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a frame, applying the overflow policy when full.
    pub fn push(&self, frame: Bytes) -> EnqueueOutcome {
        let outcome = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closing {
                EnqueueOutcome::RejectedClosed
            } else if inner.items.len() < self.capacity {
                inner.items.push_back(Outbound::Frame(frame));
                EnqueueOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        inner.items.pop_front();
                        inner.items.push_back(Outbound::Frame(frame));
                        EnqueueOutcome::DroppedOldest
                    }
                    OverflowPolicy::DropNewest => EnqueueOutcome::DroppedNewest,
                    OverflowPolicy::Disconnect => {
                        inner.closing = true;
                        inner.items.push_front(Outbound::Close(
                            "send queue overflow".to_string(),
                        ));
                        EnqueueOutcome::Disconnecting
                    }
                }
            }
        };

        if outcome.dropped_frame() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        outcome
    }

    /// Queue a close, ahead of any pending frames and regardless of
    /// capacity. Returns `false` if a close was already queued.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.closing {
            return false;
        }
        inner.closing = true;
        // Frames behind the close will never be written.
        let abandoned = inner.items.len() as u64;
        inner.items.clear();
        inner.items.push_back(Outbound::Close(reason.into()));
        drop(inner);

        self.dropped.fetch_add(abandoned, Ordering::Relaxed);
        self.notify.notify_one();
        true
    }

    /// Await the next item. Returns `None` once the queue is terminal.
    pub async fn next(&self) -> Option<Outbound> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.terminal {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    if matches!(item, Outbound::Close(_)) {
                        inner.terminal = true;
                    }
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Pop the next item without waiting, if one is queued.
    pub fn try_next(&self) -> Option<Outbound> {
        let mut inner = self.inner.lock().unwrap();
        if inner.terminal {
            return None;
        }
        let item = inner.items.pop_front()?;
        if matches!(item, Outbound::Close(_)) {
            inner.terminal = true;
        }
        Some(item)
    }

    /// Number of frames currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// Check if no frames are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames this queue has dropped.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Parameters supplied at handshake time.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    /// Client-supplied id; generated when absent.
    pub client_id: Option<String>,
    /// Declared client type.
    pub client_type: ClientType,
    /// Opaque presentation metadata (screen name, avatar, personality).
    pub metadata: Value,
}

/// One connected client.
pub struct ClientHandle {
    id: String,
    client_type: ClientType,
    metadata: Value,
    connected_at: String,
    last_activity: Mutex<Instant>,
    subscriptions: DashSet<ChannelKey>,
    queue: SendQueue,
    violations: AtomicU32,
}

impl ClientHandle {
    /// Client id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declared client type.
    #[must_use]
    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    /// Handshake metadata.
    #[must_use]
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Connection time in wire timestamp format.
    #[must_use]
    pub fn connected_at(&self) -> &str {
        &self.connected_at
    }

    /// The client's send queue.
    #[must_use]
    pub fn queue(&self) -> &SendQueue {
        &self.queue
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Record a protocol violation, returning the running total.
    pub fn record_violation(&self) -> u32 {
        self.violations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Track a subscription on this client.
    pub fn add_subscription(&self, key: ChannelKey) {
        self.subscriptions.insert(key);
    }

    /// Drop a tracked subscription.
    pub fn remove_subscription(&self, key: &ChannelKey) {
        self.subscriptions.remove(key);
    }

    /// Snapshot the client's subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<ChannelKey> {
        self.subscriptions.iter().map(|k| k.clone()).collect()
    }

    /// Number of tracked subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("client_type", &self.client_type)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-client send queue capacity in frames.
    pub send_queue_capacity: usize,
    /// Overflow policy applied to every send queue.
    pub overflow_policy: OverflowPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            send_queue_capacity: 256,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// All currently connected clients.
pub struct ClientRegistry {
    clients: DashMap<String, Arc<ClientHandle>>,
    config: RegistryConfig,
}

impl ClientRegistry {
    /// Create a registry.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            clients: DashMap::new(),
            config,
        }
    }

    /// Register a client.
    ///
    /// A missing client id gets a generated `cli-` id. Registration fails
    /// when the id is taken, the id is malformed, or the connection cap is
    /// reached.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateClient`, `InvalidClientId`, or `LimitExceeded`.
    pub fn register(&self, params: ConnectParams) -> Result<Arc<ClientHandle>, RegistryError> {
        let id = match params.client_id {
            Some(id) => {
                validate_identifier(&id).map_err(RegistryError::InvalidClientId)?;
                id
            }
            None => ids::generate(ids::CLIENT_PREFIX),
        };

        if self.clients.len() >= self.config.max_connections && !self.clients.contains_key(&id) {
            return Err(RegistryError::LimitExceeded);
        }

        let handle = Arc::new(ClientHandle {
            id: id.clone(),
            client_type: params.client_type,
            metadata: params.metadata,
            connected_at: timestamp::now(),
            last_activity: Mutex::new(Instant::now()),
            subscriptions: DashSet::new(),
            queue: SendQueue::new(self.config.send_queue_capacity, self.config.overflow_policy),
            violations: AtomicU32::new(0),
        });

        match self.clients.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RegistryError::DuplicateClient(id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&handle));
            }
        }

        debug!(client = %handle.id, client_type = %handle.client_type.as_str(), "Client registered");
        Ok(handle)
    }

    /// Look up a connected client.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<Arc<ClientHandle>> {
        self.clients.get(client_id).map(|h| Arc::clone(&h))
    }

    /// Record inbound activity for a client.
    pub fn touch(&self, client_id: &str) {
        if let Some(handle) = self.clients.get(client_id) {
            handle.touch();
        }
    }

    /// Remove a client, returning its handle for teardown.
    ///
    /// Idempotent: a second call returns `None`.
    pub fn deregister(&self, client_id: &str) -> Option<Arc<ClientHandle>> {
        let (_, handle) = self.clients.remove(client_id)?;
        debug!(client = %client_id, "Client deregistered");
        Some(handle)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if no clients are connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
