//! # agora-core
//!
//! Routing, membership, dispatch, and history for the Agora message bus.
//!
//! This crate provides the bus internals behind the transport:
//!
//! - **Hub** - The context object binding every component together
//! - **RoutingTable** - Concurrent room/channel topology and membership
//! - **ClientRegistry** - Connected clients and their send queues
//! - **HistoryStore** - Pluggable per-channel message history
//! - **Authorizer** - Capability checks per client type
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│     Hub     │────▶│  Delivery   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Dispatch   │     │   History   │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod auth;
pub mod channel;
pub mod delivery;
mod dispatch;
pub mod hub;
pub mod registry;
pub mod routing;
pub mod store;
pub mod telemetry;

pub use auth::{Authorizer, Capability, CapabilitySet, StaticAuthorizer};
pub use channel::{ChannelDescriptor, ChannelKey, CreateOptions};
pub use delivery::DeliveryReport;
pub use hub::{CountersSnapshot, Hub, HubConfig, HubCounts};
pub use registry::{
    ClientHandle, ClientRegistry, ClientType, ConnectParams, EnqueueOutcome, Outbound,
    OverflowPolicy, RegistryConfig, RegistryError, SendQueue,
};
pub use routing::{RoutingConfig, RoutingError, RoutingTable, SystemRoom};
pub use store::{
    HistoryStore, MemoryStore, SequenceId, StoreError, StoredEnvelope, StreamConfig, StreamStore,
};
pub use telemetry::{ChannelSink, LogSink, NullSink, TelemetryEvent, TelemetrySink};
