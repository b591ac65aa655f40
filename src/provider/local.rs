//! In-process resource registry
//!
//! [`LocalRegistry`] keeps resources in memory. The agent uses one as its own
//! primary registry for self-registration and administrative metadata; tests
//! use it to stand in for platform registries.

use super::{ChangeEvent, ChangeListener, ListenerId, RegistryProvider, ResourceConnection};
use crate::{
    error::{DiscoveryError, Result},
    types::{ResourceId, ResourcePattern, ServerInfo},
    utils::time::current_timestamp,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tracing::{debug, trace};

/// Operation callable on a local resource
pub type Operation = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A resource held by a [`LocalRegistry`]
#[derive(Clone, Default)]
pub struct LocalResource {
    attributes: BTreeMap<String, Value>,
    operations: HashMap<String, Operation>,
}

impl LocalResource {
    /// Create a resource without attributes or operations
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute
    pub fn with_attribute<S: Into<String>>(mut self, name: S, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Add an operation
    pub fn with_operation<S, F>(mut self, name: S, operation: F) -> Self
    where
        S: Into<String>,
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.operations.insert(name.into(), Arc::new(operation));
        self
    }

    /// Current attribute values
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }
}

impl fmt::Debug for LocalResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalResource")
            .field("attributes", &self.attributes)
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Inner {
    name: String,
    resources: RwLock<HashMap<ResourceId, LocalResource>>,
    listeners: RwLock<HashMap<ListenerId, Arc<dyn ChangeListener>>>,
    available: AtomicBool,
    last_change: AtomicU64,
    server_info: RwLock<Option<ServerInfo>>,
}

impl Inner {
    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DiscoveryError::provider_unavailable(&self.name, "registry is offline"))
        }
    }

    fn notify(&self, event: ChangeEvent) {
        self.last_change.fetch_max(current_timestamp(), Ordering::AcqRel);
        // Call listeners without holding the lock so they may query us back
        let listeners: Vec<_> = self.listeners.read().values().cloned().collect();
        trace!("{}: {} ({} listeners)", self.name, event, listeners.len());
        for listener in listeners {
            listener.on_change(&event);
        }
    }
}

impl ResourceConnection for Inner {
    fn get_attribute(&self, id: &ResourceId, attribute: &str) -> Result<Value> {
        self.ensure_available()?;
        let resources = self.resources.read();
        let resource = resources
            .get(id)
            .ok_or_else(|| DiscoveryError::resource_not_found(id))?;
        resource
            .attributes
            .get(attribute)
            .cloned()
            .ok_or_else(|| DiscoveryError::attribute_not_found(id, attribute))
    }

    fn set_attribute(&self, id: &ResourceId, attribute: &str, value: Value) -> Result<Value> {
        self.ensure_available()?;
        let mut resources = self.resources.write();
        let resource = resources
            .get_mut(id)
            .ok_or_else(|| DiscoveryError::resource_not_found(id))?;
        let slot = resource
            .attributes
            .get_mut(attribute)
            .ok_or_else(|| DiscoveryError::attribute_not_found(id, attribute))?;
        Ok(std::mem::replace(slot, value))
    }

    fn invoke(&self, id: &ResourceId, operation: &str, args: &[Value]) -> Result<Value> {
        self.ensure_available()?;
        let op = {
            let resources = self.resources.read();
            let resource = resources
                .get(id)
                .ok_or_else(|| DiscoveryError::resource_not_found(id))?;
            resource.operations.get(operation).cloned().ok_or_else(|| {
                DiscoveryError::invocation(format!("no operation '{operation}' on {id}"))
            })?
        };
        op(args)
    }
}

/// Registry provider backed by memory
#[derive(Clone)]
pub struct LocalRegistry {
    inner: Arc<Inner>,
}

impl LocalRegistry {
    /// Create an empty registry
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                resources: RwLock::new(HashMap::new()),
                listeners: RwLock::new(HashMap::new()),
                available: AtomicBool::new(true),
                last_change: AtomicU64::new(0),
                server_info: RwLock::new(None),
            }),
        }
    }

    /// Attach server metadata
    pub fn with_server_info(self, info: ServerInfo) -> Self {
        self.set_server_info(Some(info));
        self
    }

    /// Replace server metadata
    pub fn set_server_info(&self, info: Option<ServerInfo>) {
        *self.inner.server_info.write() = info;
    }

    /// Add a resource and notify listeners
    pub fn register(&self, id: ResourceId, resource: LocalResource) -> Result<()> {
        self.inner.ensure_available()?;
        {
            let mut resources = self.inner.resources.write();
            if resources.contains_key(&id) {
                return Err(DiscoveryError::ResourceExists(id.to_string()));
            }
            resources.insert(id.clone(), resource);
        }
        debug!("{}: registered {}", self.inner.name, id);
        self.inner.notify(ChangeEvent::Registered(id));
        Ok(())
    }

    /// Remove a resource and notify listeners
    pub fn unregister(&self, id: &ResourceId) -> Result<LocalResource> {
        self.inner.ensure_available()?;
        let removed = self
            .inner
            .resources
            .write()
            .remove(id)
            .ok_or_else(|| DiscoveryError::resource_not_found(id))?;
        debug!("{}: unregistered {}", self.inner.name, id);
        self.inner.notify(ChangeEvent::Unregistered(id.clone()));
        Ok(removed)
    }

    /// Simulate the backend going away or coming back
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Release);
    }

    /// Number of installed listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.inner.resources.read().len()
    }

    /// Whether the registry holds no resources
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for LocalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRegistry")
            .field("name", &self.inner.name)
            .field("resources", &self.len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl RegistryProvider for LocalRegistry {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn query_identifiers(&self, pattern: Option<&ResourcePattern>) -> Result<BTreeSet<ResourceId>> {
        self.inner.ensure_available()?;
        let resources = self.inner.resources.read();
        Ok(resources
            .keys()
            .filter(|id| pattern.is_none_or(|p| p.matches(id)))
            .cloned()
            .collect())
    }

    fn is_registered(&self, id: &ResourceId) -> Result<bool> {
        self.inner.ensure_available()?;
        Ok(self.inner.resources.read().contains_key(id))
    }

    fn connection(&self) -> Result<Arc<dyn ResourceConnection>> {
        self.inner.ensure_available()?;
        Ok(self.inner.clone())
    }

    fn subscribe(&self, listener: Arc<dyn ChangeListener>) -> Result<ListenerId> {
        self.inner.ensure_available()?;
        let id = ListenerId::new();
        self.inner.listeners.write().insert(id, listener);
        Ok(id)
    }

    fn unsubscribe(&self, listener: ListenerId) -> Result<()> {
        self.inner
            .listeners
            .write()
            .remove(&listener)
            .map(|_| ())
            .ok_or_else(|| DiscoveryError::ListenerNotFound(listener.to_string()))
    }

    fn changed_since(&self, timestamp: u64) -> Result<bool> {
        self.inner.ensure_available()?;
        Ok(self.inner.last_change.load(Ordering::Acquire) >= timestamp)
    }

    fn server_info(&self) -> Option<ServerInfo> {
        self.inner.server_info.read().clone()
    }
}
