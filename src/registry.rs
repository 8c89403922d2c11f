//! Service registry: the set of provider instances currently known to the
//! gateway, indexed by capability for routing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use gateway_core::{CapabilityDescriptor, CapabilityKind};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::balancer::InstanceStats;
use crate::circuit::{CircuitBreaker, CircuitBreakerConfig};
use crate::{Error, Result};

/// Timeout for the reachability ping `register` issues against external
/// (non-`plugin://`) endpoints before admitting them.
const REACHABILITY_PING_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Where a provider instance was learned from, kept for observability and
/// for discovery's deregistration sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOrigin {
    /// Loaded from static configuration at startup.
    Static,
    /// Learned via a [`crate::discovery`] source.
    Discovered,
    /// Registered by the plugin manager for an in-process built-in.
    Plugin,
}

/// Health as observed by the registry's active health loop (an external
/// `GET {address}/health` or a `Plugin::health_check` poll), kept separate
/// from the load balancer's rolling success-rate [`crate::balancer::HealthStatus`]
/// derived from live dispatch outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveHealth {
    /// Not yet checked.
    Unknown,
    /// Last check succeeded.
    Healthy,
    /// Last check returned a non-success status.
    Degraded,
    /// Last check failed outright (timeout or transport error).
    Unhealthy,
}

/// A single registered provider instance: its address, the capabilities it
/// offers, and the runtime state (circuit + load stats) tracked against it.
pub struct ProviderRecord {
    /// Unique id, e.g. `"memory"`, `"git-replica-2"`.
    pub id: String,
    /// Base address: `"builtin:memory"` for in-process plugins, or an HTTP(S) URL.
    pub address: String,
    /// How this record entered the registry.
    pub origin: ProviderOrigin,
    /// Version of the capability set this record was registered with, used
    /// for `(name, version, endpoint)` uniqueness checking.
    pub version: Option<String>,
    /// Capabilities currently advertised by this instance.
    pub capabilities: RwLock<Vec<CapabilityDescriptor>>,
    /// Circuit breaker guarding dispatch to this instance.
    pub circuit: CircuitBreaker,
    /// Load/latency/health bookkeeping consulted by the load balancer.
    pub stats: InstanceStats,
    /// Last result of the registry's active health poll.
    pub active_health: RwLock<ActiveHealth>,
    registered_at_epoch_ms: u64,
}

impl ProviderRecord {
    fn new(id: String, address: String, origin: ProviderOrigin, version: Option<String>, weight: u32, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            id: id.clone(),
            address,
            origin,
            version,
            capabilities: RwLock::new(Vec::new()),
            circuit: CircuitBreaker::new(id, breaker_config),
            stats: InstanceStats::new(weight),
            active_health: RwLock::new(ActiveHealth::Unknown),
            registered_at_epoch_ms: epoch_millis_now(),
        }
    }

    /// Epoch-millisecond timestamp this record was first registered.
    #[must_use]
    pub fn registered_at_epoch_ms(&self) -> u64 {
        self.registered_at_epoch_ms
    }
}

/// An event describing a change to the registry, delivered to subscribers
/// via [`ServiceRegistry::subscribe`].
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A new provider instance was registered.
    Added(String),
    /// A provider instance's capability set changed.
    Updated(String),
    /// A provider instance was deregistered.
    Removed(String),
    /// A provider instance's health status changed.
    HealthChanged(String),
}

/// `(capability kind, bare name)` → ordered provider ids lookup index,
/// derived from every registered provider's advertised capabilities and
/// rebuilt incrementally on register/deregister/update.
#[derive(Default)]
struct CapabilityIndex {
    by_name: HashMap<(CapabilityKind, String), Vec<String>>,
}

impl CapabilityIndex {
    /// Insert `provider_id` under `(kind, name)`, then re-sort the whole
    /// bucket by `(Health desc, weight desc, last-used asc)` using each
    /// entry's own stats via `stats_of` — never the just-inserted provider's.
    fn add(&mut self, kind: CapabilityKind, name: &str, provider_id: &str, stats_of: impl Fn(&str) -> Option<(crate::balancer::HealthStatus, u32, u64)>) {
        let entry = self.by_name.entry((kind, name.to_string())).or_default();
        if !entry.iter().any(|id| id == provider_id) {
            entry.push(provider_id.to_string());
        }
        entry.sort_by_key(|id| {
            let (health, weight, last_used) = stats_of(id).unwrap_or((crate::balancer::HealthStatus::Unhealthy, 0, u64::MAX));
            (health_rank(health), std::cmp::Reverse(weight), last_used)
        });
    }

    fn remove_provider(&mut self, provider_id: &str) {
        for ids in self.by_name.values_mut() {
            ids.retain(|id| id != provider_id);
        }
        self.by_name.retain(|_, ids| !ids.is_empty());
    }

    fn lookup(&self, kind: CapabilityKind, name: &str) -> Vec<String> {
        self.by_name.get(&(kind, name.to_string())).cloned().unwrap_or_default()
    }

    fn all_of_kind(&self, kind: CapabilityKind) -> Vec<(String, Vec<String>)> {
        self.by_name
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, name), ids)| (name.clone(), ids.clone()))
            .collect()
    }
}

/// The gateway's service registry: concurrent store of provider records plus
/// the derived capability index used by the router.
pub struct ServiceRegistry {
    providers: DashMap<String, Arc<ProviderRecord>>,
    index: RwLock<CapabilityIndex>,
    events: broadcast::Sender<RegistryEvent>,
    registrations_total: AtomicU64,
    http: reqwest::Client,
}

impl ServiceRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            providers: DashMap::new(),
            index: RwLock::new(CapabilityIndex::default()),
            events,
            registrations_total: AtomicU64::new(0),
            http: reqwest::Client::new(),
        }
    }

    /// Subscribe to registry change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a new provider instance with its initial capability set.
    ///
    /// Validates every descriptor, rejects a `(name, version, endpoint)`
    /// collision with a *different* existing provider, and — for non-`plugin://`
    /// origins — pings the endpoint before admitting it. Re-registering the
    /// same id replaces the existing record atomically.
    ///
    /// # Errors
    /// [`Error::InvalidRecord`] if a descriptor fails [`gateway_core::validate_descriptor`]
    /// or another provider already holds the same `(name, version, endpoint)`;
    /// [`Error::EndpointUnreachable`] if the reachability ping fails.
    pub async fn register(
        &self,
        id: impl Into<String>,
        address: impl Into<String>,
        origin: ProviderOrigin,
        version: Option<String>,
        weight: u32,
        breaker_config: CircuitBreakerConfig,
        capabilities: Vec<CapabilityDescriptor>,
    ) -> Result<Arc<ProviderRecord>> {
        let id = id.into();
        let address = address.into();

        for descriptor in &capabilities {
            gateway_core::validate_descriptor(descriptor).map_err(|e| Error::InvalidRecord(format!("{id}: {e}")))?;
        }

        if let Some(other) = self.providers.iter().find(|entry| {
            entry.key() != &id && entry.value().address == address && entry.value().version == version
        }) {
            return Err(Error::InvalidRecord(format!(
                "endpoint {address} (version {version:?}) is already registered as provider {}",
                other.key()
            )));
        }

        if origin != ProviderOrigin::Plugin {
            self.ping_endpoint(&address).await?;
        }

        let record = Arc::new(ProviderRecord::new(id.clone(), address, origin, version, weight, breaker_config));
        *record.capabilities.write() = capabilities.clone();

        self.providers.insert(id.clone(), Arc::clone(&record));
        self.reindex_provider(&id, &capabilities);
        self.registrations_total.fetch_add(1, Ordering::Relaxed);

        info!(provider = %id, capability_count = capabilities.len(), "provider registered");
        let _ = self.events.send(RegistryEvent::Added(id));
        Ok(record)
    }

    /// `GET {address}/health`, tolerating any HTTP status as "reachable" —
    /// only transport-level failure counts as unreachable.
    async fn ping_endpoint(&self, address: &str) -> Result<()> {
        let url = format!("{}/health", address.trim_end_matches('/'));
        tokio::time::timeout(REACHABILITY_PING_TIMEOUT, self.http.get(&url).send())
            .await
            .map_err(|_| Error::EndpointUnreachable(format!("{address} did not respond within {REACHABILITY_PING_TIMEOUT:?}")))?
            .map_err(|e| Error::EndpointUnreachable(format!("{address} unreachable: {e}")))?;
        Ok(())
    }

    /// Replace a provider's advertised capability set (e.g. after a hot-reload).
    pub fn update_capabilities(&self, id: &str, capabilities: Vec<CapabilityDescriptor>) {
        if let Some(record) = self.providers.get(id) {
            *record.capabilities.write() = capabilities.clone();
            self.reindex_provider(id, &capabilities);
            let _ = self.events.send(RegistryEvent::Updated(id.to_string()));
        }
    }

    /// Remove a provider entirely.
    pub fn deregister(&self, id: &str) {
        if self.providers.remove(id).is_some() {
            self.index.write().remove_provider(id);
            warn!(provider = %id, "provider deregistered");
            let _ = self.events.send(RegistryEvent::Removed(id.to_string()));
        }
    }

    /// Fetch a provider record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ProviderRecord>> {
        self.providers.get(id).map(|r| Arc::clone(&r))
    }

    /// All registered provider ids offering `(kind, name)`, weight-ordered.
    #[must_use]
    pub fn lookup(&self, kind: CapabilityKind, name: &str) -> Vec<String> {
        self.index.read().lookup(kind, name)
    }

    /// Aggregate every descriptor of `kind` across all providers, addressed
    /// by `<provider>.<name>`.
    #[must_use]
    pub fn list_capabilities(&self, kind: CapabilityKind) -> Vec<(String, CapabilityDescriptor)> {
        let mut out = Vec::new();
        for entry in &self.providers {
            let provider_id = entry.key().clone();
            for descriptor in entry.value().capabilities.read().iter() {
                if descriptor.kind == kind {
                    out.push((format!("{provider_id}.{}", descriptor.name), descriptor.clone()));
                }
            }
        }
        out
    }

    /// Number of providers currently registered.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Total registrations observed since startup, including replacements.
    #[must_use]
    pub fn registrations_total(&self) -> u64 {
        self.registrations_total.load(Ordering::Relaxed)
    }

    fn reindex_provider(&self, provider_id: &str, capabilities: &[CapabilityDescriptor]) {
        let stats_of = |id: &str| {
            self.providers
                .get(id)
                .map(|r| (r.stats.health(), r.stats.weight, r.stats.last_used_epoch_ms()))
        };
        let mut index = self.index.write();
        index.remove_provider(provider_id);
        for descriptor in capabilities {
            index.add(descriptor.kind, &descriptor.name, provider_id, stats_of);
        }
    }

    /// List every `(bare name, ordered provider ids)` pair for `kind`,
    /// primarily for `*/list` aggregation in the router.
    #[must_use]
    pub fn capability_name_index(&self, kind: CapabilityKind) -> Vec<(String, Vec<String>)> {
        self.index.read().all_of_kind(kind)
    }

    /// Poll every registered provider's health once: `Plugin` origins via
    /// `plugins.health_check`, everything else via `GET {address}{health_path}`.
    /// Emits [`RegistryEvent::HealthChanged`] for providers whose observed
    /// health differs from the last tick.
    pub async fn health_tick(&self, plugins: &crate::plugin::PluginManager, health_path: &str, timeout: Duration) {
        let ids: Vec<String> = self.providers.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            let Some(record) = self.get(&id) else { continue };

            let observed = match record.origin {
                ProviderOrigin::Plugin => match plugins.health_check(&id).await {
                    Some(crate::plugin::PluginHealth::Healthy) => ActiveHealth::Healthy,
                    Some(crate::plugin::PluginHealth::Degraded(_)) => ActiveHealth::Degraded,
                    Some(crate::plugin::PluginHealth::Unhealthy(_)) | None => ActiveHealth::Unhealthy,
                },
                ProviderOrigin::Static | ProviderOrigin::Discovered => {
                    let url = format!("{}{}", record.address.trim_end_matches('/'), health_path);
                    match tokio::time::timeout(timeout, self.http.get(&url).send()).await {
                        Ok(Ok(response)) if response.status().is_success() => ActiveHealth::Healthy,
                        Ok(Ok(_)) => ActiveHealth::Degraded,
                        _ => ActiveHealth::Unhealthy,
                    }
                }
            };

            let changed = {
                let mut current = record.active_health.write();
                if *current == observed {
                    false
                } else {
                    *current = observed;
                    true
                }
            };
            if changed {
                warn!(provider = %id, health = ?observed, "provider active health changed");
                let _ = self.events.send(RegistryEvent::HealthChanged(id));
            }
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort key for [`crate::balancer::HealthStatus`]: lower sorts first, so
/// `Healthy` (0) precedes `Degraded` (1) precedes `Unhealthy` (2) — "Health
/// desc" in lookup ordering.
fn health_rank(health: crate::balancer::HealthStatus) -> u8 {
    match health {
        crate::balancer::HealthStatus::Healthy => 0,
        crate::balancer::HealthStatus::Degraded => 1,
        crate::balancer::HealthStatus::Unhealthy => 2,
    }
}

fn epoch_millis_now() -> u64 {
    #[allow(clippy::cast_possible_truncation)]
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
