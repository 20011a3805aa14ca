//! The hub binds routing, registry, store, and dispatch together.
//!
//! One `Hub` is built at startup and passed around explicitly as
//! `Arc<Hub>`; there is no module-level state. The transport layer feeds it
//! raw inbound frames and drains the per-client send queues. Everything the
//! hub produces flows back through those queues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, trace, warn};

use agora_protocol::{
    timestamp, validate, Envelope, EnvelopeType, ValidateLimits, ValidationError, PROTOCOL_VERSION,
};

use crate::auth::{Authorizer, Capability};
use crate::channel::{ChannelDescriptor, ChannelKey};
use crate::delivery;
use crate::dispatch;
use crate::registry::{ClientHandle, ClientRegistry, ConnectParams, RegistryConfig, RegistryError};
use crate::routing::{RoutingConfig, RoutingError, RoutingTable};
use crate::store::HistoryStore;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frame validation bounds.
    pub validate: ValidateLimits,
    /// Validation failures tolerated per client before a forced disconnect.
    pub violation_limit: u32,
    /// Routing table configuration.
    pub routing: RoutingConfig,
    /// Client registry configuration.
    pub registry: RegistryConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            validate: ValidateLimits::default(),
            violation_limit: 5,
            routing: RoutingConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Monotonic activity counters. Every drop path lands in one of these.
#[derive(Debug, Default)]
pub struct Counters {
    pub(crate) messages_routed: AtomicU64,
    pub(crate) frames_dropped: AtomicU64,
    pub(crate) validation_failures: AtomicU64,
    pub(crate) persistence_failures: AtomicU64,
    pub(crate) commands_executed: AtomicU64,
    pub(crate) frames_ignored: AtomicU64,
}

impl Counters {
    /// Read every counter at once.
    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub messages_routed: u64,
    pub frames_dropped: u64,
    pub validation_failures: u64,
    pub persistence_failures: u64,
    pub commands_executed: u64,
    pub frames_ignored: u64,
}

/// Point-in-time hub state, as reported by the `status` command and the
/// health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HubCounts {
    pub clients: usize,
    pub rooms: usize,
    pub channels: usize,
    pub subscriptions: usize,
    pub uptime_seconds: u64,
    pub history_backend: &'static str,
    pub history_available: bool,
    pub counters: CountersSnapshot,
}

/// The bus context object.
pub struct Hub {
    pub(crate) routing: RoutingTable,
    pub(crate) registry: ClientRegistry,
    pub(crate) store: Arc<dyn HistoryStore>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
    pub(crate) config: HubConfig,
    pub(crate) counters: Counters,
    started_at: Instant,
}

impl Hub {
    /// Build a hub. System rooms from the routing config are created here.
    #[must_use]
    pub fn new(
        config: HubConfig,
        store: Arc<dyn HistoryStore>,
        authorizer: Arc<dyn Authorizer>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let routing = RoutingTable::new(config.routing.clone());
        let registry = ClientRegistry::new(config.registry.clone());
        Self {
            routing,
            registry,
            store,
            authorizer,
            telemetry,
            config,
            counters: Counters::default(),
            started_at: Instant::now(),
        }
    }

    /// Register a client and queue its welcome frame.
    ///
    /// # Errors
    ///
    /// Returns a `RegistryError` when the id is taken or malformed, or the
    /// connection cap is reached.
    pub fn connect(&self, params: ConnectParams) -> Result<Arc<ClientHandle>, RegistryError> {
        let handle = self.registry.register(params)?;

        self.telemetry.emit(TelemetryEvent::ClientConnected {
            client_id: handle.id().to_string(),
            client_type: handle.client_type(),
        });

        let welcome = Envelope::telemetry(
            "connected",
            json!({
                "client_id": handle.id(),
                "client_type": handle.client_type().as_str(),
                "protocol_version": PROTOCOL_VERSION.to_string(),
                "server_time": timestamp::now(),
            }),
        );
        self.enqueue_envelope(&handle, &welcome);

        Ok(handle)
    }

    /// Tear a client down: drop it from the registry and from every channel
    /// it was subscribed to. Idempotent.
    pub fn disconnect(&self, client_id: &str, reason: &str) {
        let Some(handle) = self.registry.deregister(client_id) else {
            return;
        };

        for key in handle.subscriptions() {
            if let Err(e) = self.routing.unsubscribe(&key, client_id) {
                trace!(client = %client_id, channel = %key, error = %e, "Stale subscription at teardown");
            }
        }

        self.telemetry.emit(TelemetryEvent::ClientDisconnected {
            client_id: client_id.to_string(),
            reason: reason.to_string(),
        });
        debug!(client = %client_id, reason = %reason, "Client disconnected");
    }

    /// Process one raw inbound frame from a connected client.
    ///
    /// All output flows through send queues; this returns nothing. Frames
    /// from unknown clients (a disconnect race) are silently skipped.
    pub async fn handle_inbound(&self, client_id: &str, raw: &[u8]) {
        let Some(handle) = self.registry.get(client_id) else {
            return;
        };
        handle.touch();

        let envelope = match validate(raw, &self.config.validate) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.reject_frame(&handle, &e);
                return;
            }
        };

        match envelope.kind {
            EnvelopeType::Command => {
                self.counters.commands_executed.fetch_add(1, Ordering::Relaxed);
                let reply = dispatch::dispatch(self, &handle, &envelope).await;
                self.enqueue_envelope(&handle, &reply);
            }
            EnvelopeType::Message => {
                self.route_envelope(&handle, envelope).await;
            }
            EnvelopeType::Telemetry => {
                if envelope.route().is_some() {
                    self.route_envelope(&handle, envelope).await;
                } else {
                    self.counters.frames_ignored.fetch_add(1, Ordering::Relaxed);
                    trace!(client = %client_id, "Ignoring routeless telemetry envelope");
                }
            }
            EnvelopeType::CommandResponse | EnvelopeType::Error => {
                // Replies are server-originated; client copies are not
                // answered, which would loop.
                self.counters.frames_ignored.fetch_add(1, Ordering::Relaxed);
                trace!(client = %client_id, kind = envelope.kind.as_str(), "Ignoring client-sent reply envelope");
            }
        }
    }

    /// Subscribe a client to a channel, tracking it on the handle.
    ///
    /// # Errors
    ///
    /// Returns a `RoutingError` from the table, or `LimitExceeded` when the
    /// client holds too many subscriptions.
    pub fn join_channel(
        &self,
        client: &Arc<ClientHandle>,
        key: &ChannelKey,
    ) -> Result<ChannelDescriptor, RoutingError> {
        if client.subscription_count() >= self.config.routing.max_subscriptions_per_client {
            return Err(RoutingError::LimitExceeded(
                "max subscriptions per client reached",
            ));
        }

        let descriptor = self.routing.subscribe(key, client.id())?;
        client.add_subscription(key.clone());
        Ok(descriptor)
    }

    /// Unsubscribe a client from a channel.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the channel does not exist.
    pub fn leave_channel(
        &self,
        client: &Arc<ClientHandle>,
        key: &ChannelKey,
    ) -> Result<bool, RoutingError> {
        let result = self.routing.unsubscribe(key, client.id());
        client.remove_subscription(key);
        result
    }

    /// Delete a channel: evict and notify members, purge history.
    ///
    /// Returns the number of evicted members.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the channel does not exist.
    pub async fn delete_channel(&self, key: &ChannelKey) -> Result<usize, RoutingError> {
        let evicted = self.routing.delete_channel(key)?;

        let notice = Envelope::telemetry(
            "channel_deleted",
            json!({ "room": key.room, "channel": key.channel }),
        );
        let bytes = notice.to_bytes().ok();

        for client_id in &evicted {
            if let Some(member) = self.registry.get(client_id) {
                member.remove_subscription(key);
                if let Some(bytes) = &bytes {
                    if member.queue().push(bytes.clone()).dropped_frame() {
                        self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        if let Err(e) = self.store.purge(key).await {
            self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
            warn!(channel = %key, error = %e, "History purge failed");
        }

        Ok(evicted.len())
    }

    /// Point-in-time hub state.
    #[must_use]
    pub fn counts(&self) -> HubCounts {
        HubCounts {
            clients: self.registry.len(),
            rooms: self.routing.room_count(),
            channels: self.routing.channel_count(),
            subscriptions: self.routing.subscription_count(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            history_backend: self.store.name(),
            history_available: self.store.is_available(),
            counters: self.counters.snapshot(),
        }
    }

    /// Route a message or routed telemetry envelope to its subscribers.
    async fn route_envelope(&self, handle: &Arc<ClientHandle>, envelope: Envelope) {
        if !self
            .authorizer
            .capabilities(handle)
            .contains(Capability::Publish)
        {
            let reply = Envelope::error_reply(
                Some(&envelope.id),
                "UNAUTHORIZED",
                "publishing requires the publish capability",
            );
            self.enqueue_envelope(handle, &reply);
            return;
        }

        // Validation guarantees a route on message envelopes; routed
        // telemetry is gated by the caller.
        let Some((room, channel)) = envelope.route() else {
            return;
        };
        let key = ChannelKey::new(room, channel);
        let envelope_id = envelope.id.clone();

        match delivery::deliver(self, handle, &key, envelope).await {
            Ok(report) => {
                self.counters.messages_routed.fetch_add(1, Ordering::Relaxed);
                trace!(
                    channel = %key,
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "Routed envelope"
                );
            }
            Err(e) => {
                debug!(channel = %key, code = e.code(), error = %e, "Publish failed");
                let reply = Envelope::error_reply(Some(&envelope_id), e.code(), &e.to_string());
                self.enqueue_envelope(handle, &reply);
            }
        }
    }

    /// Reply to an invalid frame and enforce the violation limit.
    fn reject_frame(&self, handle: &Arc<ClientHandle>, error: &ValidationError) {
        self.counters.validation_failures.fetch_add(1, Ordering::Relaxed);
        debug!(client = %handle.id(), code = error.code(), error = %error, "Rejected frame");

        let reply = Envelope::error_reply(None, error.code(), &error.to_string());
        self.enqueue_envelope(handle, &reply);

        let violations = handle.record_violation();
        if violations >= self.config.violation_limit {
            warn!(client = %handle.id(), violations, "Violation limit reached; disconnecting");
            handle.queue().close("protocol violation limit reached");
            self.disconnect(handle.id(), "violation limit reached");
        }
    }

    /// Encode and queue an envelope for one client.
    pub(crate) fn enqueue_envelope(&self, handle: &Arc<ClientHandle>, envelope: &Envelope) {
        match envelope.to_bytes() {
            Ok(bytes) => {
                if handle.queue().push(bytes).dropped_frame() {
                    self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!(client = %handle.id(), error = %e, "Failed to encode outbound envelope");
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthorizer;
    use crate::registry::{ClientType, Outbound};
    use crate::store::MemoryStore;
    use crate::telemetry::NullSink;
    use serde_json::Value;

    fn test_hub() -> Hub {
        test_hub_with(HubConfig::default())
    }

    fn test_hub_with(config: HubConfig) -> Hub {
        Hub::new(
            config,
            Arc::new(MemoryStore::default()),
            Arc::new(StaticAuthorizer::default()),
            Arc::new(NullSink),
        )
    }

    fn connect(hub: &Hub, id: &str, client_type: ClientType) -> Arc<ClientHandle> {
        let handle = hub
            .connect(ConnectParams {
                client_id: Some(id.to_string()),
                client_type,
                metadata: Value::Null,
            })
            .unwrap();
        // Discard the welcome frame.
        let _ = handle.queue().try_next();
        handle
    }

    fn next_envelope(handle: &Arc<ClientHandle>) -> Option<Envelope> {
        match handle.queue().try_next()? {
            Outbound::Frame(bytes) => {
                Some(validate(&bytes, &ValidateLimits::default()).unwrap())
            }
            Outbound::Close(_) => None,
        }
    }

    #[test]
    fn test_connect_sends_welcome() {
        let hub = test_hub();
        let handle = hub
            .connect(ConnectParams {
                client_id: Some("alice".to_string()),
                ..ConnectParams::default()
            })
            .unwrap();

        let welcome = next_envelope(&handle).unwrap();
        assert_eq!(welcome.kind, EnvelopeType::Telemetry);
        assert_eq!(welcome.payload["event"], "connected");
        assert_eq!(welcome.payload["client_id"], "alice");
    }

    #[test]
    fn test_duplicate_client_id_rejected() {
        let hub = test_hub();
        connect(&hub, "alice", ClientType::Human);

        let err = hub
            .connect(ConnectParams {
                client_id: Some("alice".to_string()),
                ..ConnectParams::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_CLIENT");
    }

    #[tokio::test]
    async fn test_fanout_reaches_exact_subscriber_set() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);
        let bob = connect(&hub, "bob", ClientType::Human);
        let carol = connect(&hub, "carol", ClientType::Human);

        hub.join_channel(&alice, &ChannelKey::new("science", "general")).unwrap();
        hub.join_channel(&bob, &ChannelKey::new("science", "general")).unwrap();
        hub.join_channel(&carol, &ChannelKey::new("chat", "public")).unwrap();

        let raw = Envelope::message("science", "general", json!({"text": "hi"}))
            .to_bytes()
            .unwrap();
        hub.handle_inbound("alice", &raw).await;

        // Both subscribers of science:general receive the frame, the sender
        // included; chat:public does not.
        let received = next_envelope(&bob).unwrap();
        assert_eq!(received.from.as_deref(), Some("alice"));
        assert_eq!(received.payload["text"], "hi");
        assert!(next_envelope(&alice).is_some());
        assert!(next_envelope(&carol).is_none());

        assert_eq!(hub.counters.snapshot().messages_routed, 1);
    }

    #[tokio::test]
    async fn test_publish_to_missing_channel_errors() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        let envelope = Envelope::message("nowhere", "nothing", json!({"text": "?"}));
        let id = envelope.id.clone();
        hub.handle_inbound("alice", &envelope.to_bytes().unwrap()).await;

        let reply = next_envelope(&alice).unwrap();
        assert_eq!(reply.kind, EnvelopeType::Error);
        assert_eq!(reply.payload["code"], "NOT_FOUND");
        assert_eq!(reply.reply_to.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_publish_requires_capability() {
        let hub = test_hub();
        let board = connect(&hub, "board", ClientType::Dashboard);
        let alice = connect(&hub, "alice", ClientType::Human);

        hub.join_channel(&board, &ChannelKey::new("science", "general")).unwrap();
        hub.join_channel(&alice, &ChannelKey::new("science", "general")).unwrap();

        let raw = Envelope::message("science", "general", json!({"text": "hi"}))
            .to_bytes()
            .unwrap();
        hub.handle_inbound("board", &raw).await;

        let reply = next_envelope(&board).unwrap();
        assert_eq!(reply.payload["code"], "UNAUTHORIZED");
        assert!(next_envelope(&alice).is_none());
    }

    #[tokio::test]
    async fn test_invalid_frame_gets_error_reply() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        hub.handle_inbound("alice", b"not json").await;

        let reply = next_envelope(&alice).unwrap();
        assert_eq!(reply.kind, EnvelopeType::Error);
        assert_eq!(reply.payload["code"], "MALFORMED_ENVELOPE");
        assert_eq!(hub.counters.snapshot().validation_failures, 1);
    }

    #[tokio::test]
    async fn test_violation_limit_forces_disconnect() {
        let hub = test_hub_with(HubConfig {
            violation_limit: 2,
            ..HubConfig::default()
        });
        let alice = connect(&hub, "alice", ClientType::Human);

        hub.handle_inbound("alice", b"bad 1").await;
        assert!(matches!(
            alice.queue().try_next(),
            Some(Outbound::Frame(_))
        ));

        hub.handle_inbound("alice", b"bad 2").await;
        assert!(matches!(
            alice.queue().try_next(),
            Some(Outbound::Close(_))
        ));
        assert!(hub.registry.get("alice").is_none());

        // Frames arriving after teardown are skipped.
        hub.handle_inbound("alice", b"bad 3").await;
        assert_eq!(hub.counters.snapshot().validation_failures, 2);
    }

    #[tokio::test]
    async fn test_disconnect_removes_all_memberships() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);
        let bob = connect(&hub, "bob", ClientType::Human);

        let keys = [
            ChannelKey::new("science", "general"),
            ChannelKey::new("science", "explore"),
            ChannelKey::new("chat", "public"),
        ];
        for key in &keys {
            hub.join_channel(&alice, key).unwrap();
            hub.join_channel(&bob, key).unwrap();
        }

        hub.disconnect("alice", "socket closed");
        hub.disconnect("alice", "socket closed");

        for key in &keys {
            assert_eq!(hub.routing.channel_info(key).unwrap().member_count, 1);
        }
        assert_eq!(hub.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_client_reply_envelopes_ignored() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        let raw = Envelope::error_reply(None, "FAKE", "from a client")
            .to_bytes()
            .unwrap();
        hub.handle_inbound("alice", &raw).await;

        assert!(next_envelope(&alice).is_none());
        assert_eq!(hub.counters.snapshot().frames_ignored, 1);
    }

    #[tokio::test]
    async fn test_routeless_telemetry_is_counted_and_dropped() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        let raw = Envelope::telemetry("heartbeat", json!({"n": 1}))
            .to_bytes()
            .unwrap();
        hub.handle_inbound("alice", &raw).await;

        assert!(next_envelope(&alice).is_none());
        assert_eq!(hub.counters.snapshot().frames_ignored, 1);
    }

    #[tokio::test]
    async fn test_routed_telemetry_is_delivered() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);
        let bob = connect(&hub, "bob", ClientType::Human);
        hub.join_channel(&bob, &ChannelKey::new("ops", "events")).unwrap();

        let raw = Envelope::telemetry("sensor", json!({"reading": 42}))
            .with_route("ops", "events")
            .to_bytes()
            .unwrap();
        hub.handle_inbound("alice", &raw).await;

        let received = next_envelope(&bob).unwrap();
        assert_eq!(received.kind, EnvelopeType::Telemetry);
        assert_eq!(received.from.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_delete_channel_notifies_and_evicts() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);
        let key = ChannelKey::new("science", "general");
        hub.join_channel(&alice, &key).unwrap();

        let evicted = hub.delete_channel(&key).await.unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(alice.subscription_count(), 0);

        let notice = next_envelope(&alice).unwrap();
        assert_eq!(notice.kind, EnvelopeType::Telemetry);
        assert_eq!(notice.payload["event"], "channel_deleted");
        assert_eq!(notice.payload["channel"], "general");
    }

    #[test]
    fn test_counts_reflect_state() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);
        hub.join_channel(&alice, &ChannelKey::new("science", "general")).unwrap();

        let counts = hub.counts();
        assert_eq!(counts.clients, 1);
        assert_eq!(counts.rooms, 1);
        assert_eq!(counts.channels, 1);
        assert_eq!(counts.subscriptions, 1);
        assert_eq!(counts.history_backend, "memory");
        assert!(counts.history_available);
    }

    #[tokio::test]
    async fn test_subscription_cap() {
        let hub = test_hub_with(HubConfig {
            routing: RoutingConfig {
                max_subscriptions_per_client: 1,
                ..RoutingConfig::default()
            },
            ..HubConfig::default()
        });
        let alice = connect(&hub, "alice", ClientType::Human);

        hub.join_channel(&alice, &ChannelKey::new("a", "x")).unwrap();
        let err = hub
            .join_channel(&alice, &ChannelKey::new("a", "y"))
            .unwrap_err();
        assert_eq!(err.code(), "LIMIT_EXCEEDED");
    }
}
