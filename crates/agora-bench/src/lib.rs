//! # agora-bench
//!
//! Benchmark harnesses for the Agora message bus. The criterion benches
//! exercise the in-process hot paths; the `e2e_throughput` binary drives a
//! running server over real WebSockets.

use std::sync::Arc;

use agora_core::{
    ChannelKey, ClientHandle, ClientType, ConnectParams, Hub, HubConfig, MemoryStore, NullSink,
    StaticAuthorizer,
};
use agora_protocol::Envelope;
use serde_json::json;

/// Build a message envelope with a payload of roughly `size` bytes.
#[must_use]
pub fn message_of_size(size: usize) -> Envelope {
    Envelope::message("bench", "broadcast", json!({ "data": "x".repeat(size) }))
}

/// Build a hub with `subscribers` clients joined to `bench:broadcast`.
///
/// Welcome frames are drained so the queues start empty.
#[must_use]
pub fn hub_with_subscribers(subscribers: usize) -> (Hub, Vec<Arc<ClientHandle>>) {
    let hub = Hub::new(
        HubConfig::default(),
        Arc::new(MemoryStore::default()),
        Arc::new(StaticAuthorizer::default()),
        Arc::new(NullSink),
    );
    let key = ChannelKey::new("bench", "broadcast");

    let handles = (0..subscribers)
        .map(|i| {
            let handle = hub
                .connect(ConnectParams {
                    client_id: Some(format!("conn-{i}")),
                    client_type: ClientType::Service,
                    metadata: serde_json::Value::Null,
                })
                .expect("connect");
            while handle.queue().try_next().is_some() {}
            hub.join_channel(&handle, &key).expect("join");
            handle
        })
        .collect();

    (hub, handles)
}
