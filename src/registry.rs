//! Aggregated view over several resource registries
//!
//! The [`ResourceAggregator`] holds an ordered list of
//! [`RegistryProvider`]s. The first one is the primary: it is consulted first
//! and can never be removed. An identifier owned by more than one provider
//! resolves to the first owner in list order; copies further down the list are
//! invisible to resolution, enumeration and queries.
//!
//! Membership changes swap in a new immutable provider list, so readers never
//! take a lock and never observe a half-applied change.

use crate::{
    error::{DiscoveryError, Result},
    provider::{ChangeEvent, ChangeListener, ListenerId, RegistryProvider, ResourceConnection},
    types::{ResourceId, ResourcePattern, ServerInfo},
    utils::time::current_timestamp,
};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{BTreeSet, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, info, trace, warn};

/// How bulk enumeration reacts to failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Record the failure and move on to the next resource or provider
    #[default]
    Continue,
    /// Stop at the first failure and return it
    FailFast,
}

/// A failure recorded while enumerating in [`ErrorMode::Continue`]
#[derive(Debug)]
pub struct EachFailure {
    /// Provider the failure belongs to
    pub provider: String,
    /// Resource the callback failed on; `None` if the provider could not be
    /// enumerated at all
    pub resource: Option<ResourceId>,
    /// The error
    pub error: DiscoveryError,
}

/// Outcome of [`ResourceAggregator::for_each`]
#[derive(Debug, Default)]
pub struct EachSummary {
    /// Callback invocations that succeeded
    pub visited: usize,
    /// Resources skipped because a higher-priority provider owns the same id
    pub hidden: usize,
    /// Failures recorded in continue-on-error mode
    pub failures: Vec<EachFailure>,
}

impl EachSummary {
    /// Whether every callback and provider succeeded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
struct ProviderEntry {
    provider: Arc<dyn RegistryProvider>,
    listener: Option<ListenerId>,
}

/// Listener installed on every provider to track structural changes
#[derive(Debug, Default)]
struct ChangeRecorder {
    last_change: AtomicU64,
}

impl ChangeRecorder {
    fn touch(&self) {
        self.last_change.fetch_max(current_timestamp(), Ordering::AcqRel);
    }

    fn last_change(&self) -> u64 {
        self.last_change.load(Ordering::Acquire)
    }
}

impl ChangeListener for ChangeRecorder {
    fn on_change(&self, event: &ChangeEvent) {
        trace!("Registry change: {}", event);
        self.touch();
    }
}

/// Single logical registry over an ordered set of providers
pub struct ResourceAggregator {
    providers: ArcSwap<Vec<ProviderEntry>>,
    writer: Mutex<()>,
    recorder: Arc<ChangeRecorder>,
}

impl ResourceAggregator {
    /// Create an aggregator with `primary` first, then `others` in order
    ///
    /// # Errors
    ///
    /// Fails if a provider name is used twice or a provider refuses the change
    /// listener. Listeners already installed are removed again before the
    /// error is returned.
    pub fn new<I>(primary: Arc<dyn RegistryProvider>, others: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn RegistryProvider>>,
    {
        let aggregator = Self {
            providers: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            recorder: Arc::new(ChangeRecorder::default()),
        };

        for provider in std::iter::once(primary).chain(others) {
            if let Err(e) = aggregator.register_provider(provider) {
                warn!("Aggregator initialization failed: {}", e);
                aggregator.destroy();
                return Err(e);
            }
        }

        Ok(aggregator)
    }

    /// Create an aggregator with only a primary provider
    pub fn with_primary(primary: Arc<dyn RegistryProvider>) -> Result<Self> {
        Self::new(primary, std::iter::empty())
    }

    /// Append a provider with the lowest priority
    pub fn register_provider(&self, provider: Arc<dyn RegistryProvider>) -> Result<()> {
        let _guard = self.writer.lock();
        let current = self.providers.load();

        if current.iter().any(|e| e.provider.name() == provider.name()) {
            return Err(DiscoveryError::DuplicateProvider(provider.name().to_string()));
        }

        let listener = provider.subscribe(self.recorder.clone() as Arc<dyn ChangeListener>)?;

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(ProviderEntry {
            provider: provider.clone(),
            listener: Some(listener),
        });
        let position = next.len();
        self.providers.store(Arc::new(next));
        self.recorder.touch();

        info!(
            "Registered provider '{}' at priority {}{}",
            provider.name(),
            position,
            if position == 1 { " (primary)" } else { "" }
        );
        Ok(())
    }

    /// Remove a provider by name, returning it
    ///
    /// The primary provider cannot be removed.
    pub fn unregister_provider(&self, name: &str) -> Result<Arc<dyn RegistryProvider>> {
        let _guard = self.writer.lock();
        let current = self.providers.load();

        let index = current
            .iter()
            .position(|e| e.provider.name() == name)
            .ok_or_else(|| DiscoveryError::UnknownProvider(name.to_string()))?;
        if index == 0 {
            return Err(DiscoveryError::PrimaryProvider(name.to_string()));
        }

        let removed = current[index].clone();
        let next: Vec<_> = current
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, e)| e.clone())
            .collect();
        self.providers.store(Arc::new(next));

        if let Some(listener) = removed.listener {
            if let Err(e) = removed.provider.unsubscribe(listener) {
                debug!("Failed to remove listener from provider '{}': {}", name, e);
            }
        }
        self.recorder.touch();

        info!("Unregistered provider '{}'", name);
        Ok(removed.provider)
    }

    /// Remove every listener this aggregator installed
    ///
    /// Safe to call repeatedly and when nothing was ever installed. Providers
    /// stay registered.
    pub fn destroy(&self) {
        let _guard = self.writer.lock();
        let current = self.providers.load();
        if current.iter().all(|e| e.listener.is_none()) {
            return;
        }

        let mut next = Vec::with_capacity(current.len());
        for entry in current.iter() {
            if let Some(listener) = entry.listener {
                if let Err(e) = entry.provider.unsubscribe(listener) {
                    debug!(
                        "Ignoring listener removal failure on '{}': {}",
                        entry.provider.name(),
                        e
                    );
                }
            }
            next.push(ProviderEntry {
                provider: entry.provider.clone(),
                listener: None,
            });
        }
        self.providers.store(Arc::new(next));
        debug!("Removed change listeners from {} providers", current.len());
    }

    /// Find the provider owning `id`
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::ResourceNotFound`] naming `id` when no provider owns
    /// it. If a provider is unavailable before an owner was found its error
    /// is returned, since it might hide the identifier.
    pub fn resolve(&self, id: &ResourceId) -> Result<Arc<dyn RegistryProvider>> {
        let snapshot = self.providers.load();
        resolve_in(&snapshot, id).map(|entry| entry.provider.clone())
    }

    /// Resolve `id` and run `action` against the owning provider's connection
    ///
    /// Errors returned by `action` are passed through unchanged.
    pub fn execute<T, F>(&self, id: &ResourceId, action: F, extra_args: &[Value]) -> Result<T>
    where
        F: FnOnce(&dyn ResourceConnection, &ResourceId, &[Value]) -> Result<T>,
    {
        let provider = self.resolve(id)?;
        let connection = provider.connection()?;
        trace!("Executing on {} via '{}'", id, provider.name());
        action(connection.as_ref(), id, extra_args)
    }

    /// Run `callback` for one resource or for every visible resource
    ///
    /// Bulk enumeration continues past failures; see
    /// [`for_each_with`](Self::for_each_with) for fail-fast behaviour.
    pub fn for_each<F>(&self, id: Option<&ResourceId>, callback: F) -> Result<EachSummary>
    where
        F: FnMut(&dyn ResourceConnection, &ResourceId) -> Result<()>,
    {
        self.for_each_with(id, ErrorMode::Continue, callback)
    }

    /// Run `callback` for one resource or for every visible resource
    ///
    /// With an identifier the callback runs once against the owner and any
    /// error is returned as is. Without one, providers are walked in priority
    /// order over a single snapshot of the provider list; identifiers already
    /// seen in an earlier provider are skipped.
    pub fn for_each_with<F>(
        &self,
        id: Option<&ResourceId>,
        mode: ErrorMode,
        mut callback: F,
    ) -> Result<EachSummary>
    where
        F: FnMut(&dyn ResourceConnection, &ResourceId) -> Result<()>,
    {
        let snapshot = self.providers.load_full();
        let mut summary = EachSummary::default();

        if let Some(id) = id {
            let entry = resolve_in(&snapshot, id)?;
            let connection = entry.provider.connection()?;
            callback(connection.as_ref(), id)?;
            summary.visited = 1;
            return Ok(summary);
        }

        let mut seen: HashSet<ResourceId> = HashSet::new();
        for entry in snapshot.iter() {
            let name = entry.provider.name();
            let listed = entry
                .provider
                .query_identifiers(None)
                .and_then(|ids| entry.provider.connection().map(|conn| (ids, conn)));

            let (ids, connection) = match listed {
                Ok(listed) => listed,
                Err(e) if mode == ErrorMode::FailFast => return Err(e),
                Err(e) => {
                    warn!("Skipping provider '{}' during enumeration: {}", name, e);
                    summary.failures.push(EachFailure {
                        provider: name.to_string(),
                        resource: None,
                        error: e,
                    });
                    continue;
                }
            };

            for resource in ids {
                if !seen.insert(resource.clone()) {
                    trace!("{} in '{}' is hidden by a higher-priority provider", resource, name);
                    summary.hidden += 1;
                    continue;
                }

                match callback(connection.as_ref(), &resource) {
                    Ok(()) => summary.visited += 1,
                    Err(e) if mode == ErrorMode::FailFast => return Err(e),
                    Err(e) => {
                        debug!("Callback failed for {} in '{}': {}", resource, name, e);
                        summary.failures.push(EachFailure {
                            provider: name.to_string(),
                            resource: Some(resource),
                            error: e,
                        });
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Union of the identifiers of all providers, optionally filtered
    ///
    /// Unavailable providers are skipped.
    pub fn query_identifiers(&self, pattern: Option<&ResourcePattern>) -> BTreeSet<ResourceId> {
        let snapshot = self.providers.load();
        let mut ids = BTreeSet::new();
        for entry in snapshot.iter() {
            match entry.provider.query_identifiers(pattern) {
                Ok(found) => ids.extend(found),
                Err(e) => warn!(
                    "Skipping provider '{}' in identifier query: {}",
                    entry.provider.name(),
                    e
                ),
            }
        }
        ids
    }

    /// Whether the set of resources changed at or after `timestamp`
    ///
    /// `timestamp` is in seconds since the Unix epoch; `0` always reports a
    /// change. Changes are tracked per second, so callers must tolerate up to
    /// one second of staleness.
    pub fn has_changed_since(&self, timestamp: u64) -> bool {
        if timestamp == 0 || self.recorder.last_change() >= timestamp {
            return true;
        }

        let snapshot = self.providers.load();
        snapshot
            .iter()
            .any(|entry| match entry.provider.changed_since(timestamp) {
                Ok(changed) => changed,
                Err(e) => {
                    debug!(
                        "Provider '{}' could not report changes: {}",
                        entry.provider.name(),
                        e
                    );
                    false
                }
            })
    }

    /// Second of the last structural change observed through listeners
    pub fn last_changed(&self) -> u64 {
        self.recorder.last_change()
    }

    /// The primary provider
    pub fn primary(&self) -> Arc<dyn RegistryProvider> {
        // Never empty: construction registers the primary and it cannot be removed
        self.providers.load()[0].provider.clone()
    }

    /// Provider names in priority order
    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .load()
            .iter()
            .map(|e| e.provider.name().to_string())
            .collect()
    }

    /// Server metadata of the primary provider
    ///
    /// Other providers never contribute, even when the primary reports none.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.primary().server_info().filter(|info| !info.is_empty())
    }
}

impl fmt::Debug for ResourceAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceAggregator")
            .field("providers", &self.provider_names())
            .field("last_changed", &self.last_changed())
            .finish()
    }
}

impl Drop for ResourceAggregator {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn resolve_in<'a>(entries: &'a [ProviderEntry], id: &ResourceId) -> Result<&'a ProviderEntry> {
    for entry in entries {
        match entry.provider.is_registered(id) {
            Ok(true) => return Ok(entry),
            Ok(false) => continue,
            Err(e) => {
                warn!(
                    "Provider '{}' failed while resolving {}: {}",
                    entry.provider.name(),
                    id,
                    e
                );
                return Err(e);
            }
        }
    }
    Err(DiscoveryError::resource_not_found(id))
}
