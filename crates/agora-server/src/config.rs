//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (AGORA_*)
//! - TOML configuration file
//! - A file path passed as the first command line argument

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use agora_core::{
    Capability, CapabilitySet, ClientType, HistoryStore, HubConfig, MemoryStore, OverflowPolicy,
    RegistryConfig, StaticAuthorizer, StreamConfig, StreamStore, SystemRoom,
};
use agora_protocol::ValidateLimits;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Routing table behavior.
    #[serde(default)]
    pub routing: RoutingSection,

    /// Message history backend.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Send queue overflow policy.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Capability overrides per client type, e.g. `dashboard = ["inspect"]`.
    #[serde(default)]
    pub auth: BTreeMap<String, Vec<String>>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound envelope size in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Per-client send queue capacity in frames.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    /// Validation failures tolerated before a forced disconnect.
    #[serde(default = "default_violation_limit")]
    pub violation_limit: u32,
}

/// Routing table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    /// Maximum number of channels.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Create missing channels when a client joins them.
    #[serde(default = "default_true")]
    pub auto_create_on_join: bool,

    /// Create missing channels when a client publishes to them.
    #[serde(default)]
    pub auto_create_on_publish: bool,

    /// Delete channels when their last member leaves.
    #[serde(default = "default_true")]
    pub auto_delete_empty: bool,

    /// Rooms created at startup and never auto-deleted.
    #[serde(default)]
    pub system_rooms: Vec<SystemRoom>,
}

/// History backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryBackend {
    /// Bounded in-process ring per channel.
    #[default]
    Memory,
    /// External append-log service over HTTP.
    Stream,
}

/// Message history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Which backend stores per-channel history.
    #[serde(default)]
    pub backend: HistoryBackend,

    /// Ring capacity per channel for the memory backend.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Stream backend settings.
    #[serde(default)]
    pub stream: StreamSection,
}

/// Append-log service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSection {
    /// Base URL of the append-log service.
    #[serde(default = "default_stream_base_url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_stream_timeout_ms")]
    pub timeout_ms: u64,

    /// Fail-fast window after a transport failure, in milliseconds.
    #[serde(default = "default_stream_cooldown_ms")]
    pub retry_cooldown_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle eviction timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("AGORA_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("AGORA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_max_payload_bytes() -> usize {
    64 * 1024 // 64 KiB
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_violation_limit() -> u32 {
    5
}

fn default_max_channels() -> usize {
    10_000
}

fn default_channel_capacity() -> usize {
    256
}

fn default_stream_base_url() -> String {
    "http://127.0.0.1:7171".to_string()
}

fn default_stream_timeout_ms() -> u64 {
    2_000
}

fn default_stream_cooldown_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            limits: LimitsConfig::default(),
            routing: RoutingSection::default(),
            history: HistoryConfig::default(),
            overflow_policy: OverflowPolicy::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            auth: BTreeMap::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_connections: default_max_connections(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            send_queue_capacity: default_send_queue_capacity(),
            violation_limit: default_violation_limit(),
        }
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            auto_create_on_join: true,
            auto_create_on_publish: false,
            auto_delete_empty: true,
            system_rooms: Vec::new(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::default(),
            channel_capacity: default_channel_capacity(),
            stream: StreamSection::default(),
        }
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            base_url: default_stream_base_url(),
            timeout_ms: default_stream_timeout_ms(),
            retry_cooldown_ms: default_stream_cooldown_ms(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "agora.toml",
            "/etc/agora/agora.toml",
            "~/.config/agora/agora.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Map the file sections onto the hub configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            validate: ValidateLimits {
                max_frame_bytes: self.limits.max_payload_bytes,
            },
            violation_limit: self.limits.violation_limit,
            routing: agora_core::RoutingConfig {
                max_channels: self.routing.max_channels,
                max_subscriptions_per_client: self.limits.max_subscriptions_per_connection,
                auto_create_on_join: self.routing.auto_create_on_join,
                auto_create_on_publish: self.routing.auto_create_on_publish,
                auto_delete_empty: self.routing.auto_delete_empty,
                system_rooms: self.routing.system_rooms.clone(),
            },
            registry: RegistryConfig {
                max_connections: self.limits.max_connections,
                send_queue_capacity: self.limits.send_queue_capacity,
                overflow_policy: self.overflow_policy,
            },
        }
    }

    /// Build the configured history store.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream backend is selected and its base URL
    /// is invalid.
    pub fn build_store(&self) -> Result<Arc<dyn HistoryStore>> {
        match self.history.backend {
            HistoryBackend::Memory => Ok(Arc::new(MemoryStore::new(self.history.channel_capacity))),
            HistoryBackend::Stream => {
                let store = StreamStore::new(StreamConfig {
                    base_url: self.history.stream.base_url.clone(),
                    timeout: Duration::from_millis(self.history.stream.timeout_ms),
                    retry_cooldown: Duration::from_millis(self.history.stream.retry_cooldown_ms),
                })
                .context("Failed to build stream history store")?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Build the authorizer, applying `[auth]` overrides on the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error naming any unknown client type or capability.
    pub fn authorizer(&self) -> Result<StaticAuthorizer> {
        let mut authorizer = StaticAuthorizer::default();

        for (type_name, capability_names) in &self.auth {
            let Some(client_type) = ClientType::parse(type_name) else {
                bail!("Unknown client type in [auth]: {type_name}");
            };

            let mut set = CapabilitySet::EMPTY;
            for name in capability_names {
                let Some(capability) = Capability::parse(name) else {
                    bail!("Unknown capability for {type_name}: {name}");
                };
                set = set.with(capability);
            }

            authorizer = authorizer.with_capabilities(client_type, set);
        }

        Ok(authorizer)
    }
}
