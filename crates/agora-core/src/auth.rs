//! Capability checks for commands and publishes.
//!
//! Token verification lives outside the bus. By the time a client reaches
//! the registry it is authenticated; this module only answers what the
//! client may do, through the [`Authorizer`] seam.

use std::collections::HashMap;

use crate::registry::{ClientHandle, ClientType};

/// A single permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Publish messages to channels.
    Publish,
    /// Join, leave, and read channel history.
    Subscribe,
    /// Create and delete channels.
    Manage,
    /// Read server and channel state.
    Inspect,
}

impl Capability {
    /// Configuration name of this capability.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Publish => "publish",
            Capability::Subscribe => "subscribe",
            Capability::Manage => "manage",
            Capability::Inspect => "inspect",
        }
    }

    /// Parse a capability name from configuration.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "publish" => Some(Capability::Publish),
            "subscribe" => Some(Capability::Subscribe),
            "manage" => Some(Capability::Manage),
            "inspect" => Some(Capability::Inspect),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::Publish => 1,
            Capability::Subscribe => 1 << 1,
            Capability::Manage => 1 << 2,
            Capability::Inspect => 1 << 3,
        }
    }
}

/// A set of capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Every capability.
    #[must_use]
    pub fn all() -> Self {
        Self::EMPTY
            .with(Capability::Publish)
            .with(Capability::Subscribe)
            .with(Capability::Manage)
            .with(Capability::Inspect)
    }

    /// Add a capability.
    #[must_use]
    pub fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, CapabilitySet::with)
    }
}

/// Supplies per-client capability sets.
pub trait Authorizer: Send + Sync {
    /// Capabilities of the given client.
    fn capabilities(&self, client: &ClientHandle) -> CapabilitySet;
}

/// Maps client types to fixed capability sets.
///
/// Defaults: humans and agents publish, subscribe, and inspect; dashboards
/// only subscribe and inspect; services hold every capability including
/// channel management.
pub struct StaticAuthorizer {
    by_type: HashMap<ClientType, CapabilitySet>,
}

impl StaticAuthorizer {
    /// Override the capability set for one client type.
    #[must_use]
    pub fn with_capabilities(mut self, client_type: ClientType, set: CapabilitySet) -> Self {
        self.by_type.insert(client_type, set);
        self
    }
}

impl Default for StaticAuthorizer {
    fn default() -> Self {
        let standard = CapabilitySet::EMPTY
            .with(Capability::Publish)
            .with(Capability::Subscribe)
            .with(Capability::Inspect);
        let observer = CapabilitySet::EMPTY
            .with(Capability::Subscribe)
            .with(Capability::Inspect);

        let mut by_type = HashMap::new();
        by_type.insert(ClientType::Human, standard);
        by_type.insert(ClientType::AiAgent, standard);
        by_type.insert(ClientType::Dashboard, observer);
        by_type.insert(ClientType::Service, CapabilitySet::all());

        Self { by_type }
    }
}

impl Authorizer for StaticAuthorizer {
    fn capabilities(&self, client: &ClientHandle) -> CapabilitySet {
        self.by_type
            .get(&client.client_type())
            .copied()
            .unwrap_or(CapabilitySet::EMPTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClientRegistry, ConnectParams};

    fn client_of(client_type: ClientType) -> std::sync::Arc<ClientHandle> {
        let registry = ClientRegistry::default();
        registry
            .register(ConnectParams {
                client_type,
                ..ConnectParams::default()
            })
            .unwrap()
    }

    #[test]
    fn test_capability_sets() {
        let set = CapabilitySet::EMPTY.with(Capability::Publish);
        assert!(set.contains(Capability::Publish));
        assert!(!set.contains(Capability::Manage));

        assert!(CapabilitySet::all().contains(Capability::Manage));
        assert!(!CapabilitySet::EMPTY.contains(Capability::Inspect));
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!(Capability::parse("manage"), Some(Capability::Manage));
        assert_eq!(Capability::parse("root"), None);

        let set: CapabilitySet = ["publish", "inspect"]
            .iter()
            .filter_map(|name| Capability::parse(name))
            .collect();
        assert!(set.contains(Capability::Publish));
        assert!(set.contains(Capability::Inspect));
        assert!(!set.contains(Capability::Subscribe));
    }

    #[test]
    fn test_default_grants() {
        let authorizer = StaticAuthorizer::default();

        let human = client_of(ClientType::Human);
        assert!(authorizer.capabilities(&human).contains(Capability::Publish));
        assert!(!authorizer.capabilities(&human).contains(Capability::Manage));

        let dashboard = client_of(ClientType::Dashboard);
        assert!(!authorizer.capabilities(&dashboard).contains(Capability::Publish));
        assert!(authorizer.capabilities(&dashboard).contains(Capability::Inspect));

        let service = client_of(ClientType::Service);
        assert!(authorizer.capabilities(&service).contains(Capability::Manage));
    }

    #[test]
    fn test_overrides() {
        let authorizer = StaticAuthorizer::default()
            .with_capabilities(ClientType::Human, CapabilitySet::EMPTY);

        let human = client_of(ClientType::Human);
        assert!(!authorizer.capabilities(&human).contains(Capability::Publish));
    }
}
