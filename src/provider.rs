//! Registry provider capability
//!
//! A [`RegistryProvider`] is one backend source of manageable resources. The
//! [`ResourceAggregator`](crate::registry::ResourceAggregator) combines several
//! of them into one namespace. Management mechanics stay behind
//! [`ResourceConnection`]: the aggregator only decides *which* provider owns an
//! identifier, never how an attribute is read.

use crate::{
    error::Result,
    types::{ResourceId, ResourcePattern, ServerInfo},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeSet, fmt, sync::Arc};
use uuid::Uuid;

pub mod local;

/// Structural change reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    /// A resource was added
    Registered(ResourceId),
    /// A resource was removed
    Unregistered(ResourceId),
}

impl ChangeEvent {
    /// Identifier the event is about
    pub fn resource(&self) -> &ResourceId {
        match self {
            Self::Registered(id) | Self::Unregistered(id) => id,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered(id) => write!(f, "Registered {id}"),
            Self::Unregistered(id) => write!(f, "Unregistered {id}"),
        }
    }
}

/// Receiver of structural change notifications
pub trait ChangeListener: Send + Sync {
    /// Called after a resource was added to or removed from a provider
    fn on_change(&self, event: &ChangeEvent);
}

/// Handle identifying an installed listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Generate a fresh listener id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access to the resources of one provider
///
/// Implementations report unknown attributes as
/// [`DiscoveryError::AttributeNotFound`](crate::error::DiscoveryError::AttributeNotFound)
/// and a lost backend as
/// [`DiscoveryError::ProviderUnavailable`](crate::error::DiscoveryError::ProviderUnavailable).
pub trait ResourceConnection: Send + Sync {
    /// Read an attribute
    fn get_attribute(&self, id: &ResourceId, attribute: &str) -> Result<Value>;

    /// Write an attribute, returning the previous value
    fn set_attribute(&self, id: &ResourceId, attribute: &str, value: Value) -> Result<Value>;

    /// Invoke an operation
    fn invoke(&self, id: &ResourceId, operation: &str, args: &[Value]) -> Result<Value>;
}

/// A backend registry of manageable resources
pub trait RegistryProvider: Send + Sync {
    /// Stable name, unique within one aggregator
    fn name(&self) -> &str;

    /// Identifiers currently registered, optionally restricted by a pattern
    fn query_identifiers(&self, pattern: Option<&ResourcePattern>) -> Result<BTreeSet<ResourceId>>;

    /// Whether this provider currently owns `id`
    fn is_registered(&self, id: &ResourceId) -> Result<bool>;

    /// Connection used to act on this provider's resources
    fn connection(&self) -> Result<Arc<dyn ResourceConnection>>;

    /// Install a change listener
    fn subscribe(&self, listener: Arc<dyn ChangeListener>) -> Result<ListenerId>;

    /// Remove a previously installed listener
    fn unsubscribe(&self, listener: ListenerId) -> Result<()>;

    /// Whether the provider itself recorded a structural change at or after
    /// `timestamp` (seconds since the Unix epoch)
    ///
    /// Providers that announce every change through listeners can rely on the
    /// default, which leaves change detection to the aggregator.
    fn changed_since(&self, _timestamp: u64) -> Result<bool> {
        Ok(false)
    }

    /// Metadata about the hosting server, if this provider knows it
    fn server_info(&self) -> Option<ServerInfo> {
        None
    }
}

impl fmt::Debug for dyn RegistryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryProvider")
            .field("name", &self.name())
            .finish()
    }
}
