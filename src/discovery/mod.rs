//! Service discovery: independent sources that each surface a list of
//! candidate providers, each probed for capabilities and registered.

mod cluster;
mod dns;
mod kv;
mod r#static;

pub use cluster::ClusterApiSource;
pub use dns::DnsSrvSource;
pub use kv::KvHealthSource;
pub use r#static::StaticSource;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::{CapabilityDescriptor, CapabilityKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::circuit::CircuitBreakerConfig;
use crate::registry::{ProviderOrigin, ServiceRegistry};
use crate::{Error, Result};

/// A provider candidate surfaced by a discovery source, before capability probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredService {
    /// Stable id within the source (not yet namespaced for the registry).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// MCP capability family this service is expected to offer, if known.
    pub service_type: Option<String>,
    /// Reachable host or address.
    pub address: String,
    /// Port, if the protocol needs one explicitly.
    pub port: Option<u16>,
    /// `http` or `https`.
    pub protocol: String,
    /// Free-form tags/labels carried from the source.
    pub tags: Vec<String>,
    /// Arbitrary source-specific metadata.
    pub metadata: HashMap<String, String>,
    /// Which source produced this record.
    pub source: String,
}

impl DiscoveredService {
    /// Base URL to probe and invoke against.
    #[must_use]
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{port}", self.protocol, self.address),
            None => format!("{}://{}", self.protocol, self.address),
        }
    }
}

/// A pure discovery source: no side effects beyond the lookup itself.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Source name, used as `DiscoveredService::source` and in logs.
    fn name(&self) -> &str;

    /// Return the currently-visible set of candidates.
    async fn discover(&self) -> Result<Vec<DiscoveredService>>;
}

/// Per-service retry bookkeeping kept across discovery cycles.
struct Attempts {
    count: u32,
    last_seen_epoch_ms: u64,
}

/// Configuration governing capability probing and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Timeout applied to each of the `/tools`, `/resources`, `/prompts` probes.
    #[serde(with = "crate::config::humantime_serde")]
    pub probe_timeout: Duration,
    /// Maximum probe attempts before a candidate is given up on for this cycle.
    pub max_retries: u32,
    /// Backoff floor between retries.
    #[serde(with = "crate::config::humantime_serde")]
    pub retry_interval: Duration,
    /// How often a full discovery cycle runs across all sources.
    #[serde(with = "crate::config::humantime_serde")]
    pub poll_interval: Duration,
    /// Static provider addresses, probed directly with no lookup.
    #[serde(default)]
    pub static_addresses: Vec<String>,
    /// DNS-SRV source: service name and domains to query, if enabled.
    #[serde(default)]
    pub dns: Option<DnsDiscoveryConfig>,
    /// KV/health-registry source, if enabled.
    #[serde(default)]
    pub kv: Option<KvDiscoveryConfig>,
    /// Cluster-API source, if enabled.
    #[serde(default)]
    pub cluster: Option<ClusterDiscoveryConfig>,
}

/// DNS-SRV discovery source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsDiscoveryConfig {
    /// SRV record service name, e.g. `_mcp._tcp`.
    pub service_name: String,
    /// Domains to query the record under.
    pub domains: Vec<String>,
}

/// KV/health-registry discovery source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvDiscoveryConfig {
    /// Base URL of the health registry (e.g. a Consul agent).
    pub registry_base_url: String,
    /// Service name to poll for.
    pub service_name: String,
}

/// Cluster-API discovery source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDiscoveryConfig {
    /// Cluster API server base URL.
    pub api_server: String,
    /// Namespace to list services in.
    pub namespace: String,
    /// Optional label selector.
    pub label_selector: Option<String>,
    /// Path to the mounted service-account token.
    pub token_path: String,
    /// Optional path to a CA certificate for the API server.
    pub ca_cert_path: Option<String>,
}

impl Default for ClusterDiscoveryConfig {
    fn default() -> Self {
        Self {
            api_server: "https://kubernetes.default.svc".to_string(),
            namespace: "default".to_string(),
            label_selector: None,
            token_path: "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string(),
            ca_cert_path: None,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_interval: Duration::from_millis(500),
            poll_interval: Duration::from_secs(30),
            static_addresses: Vec::new(),
            dns: None,
            kv: None,
            cluster: None,
        }
    }
}

/// Drives every configured [`DiscoverySource`], probes new candidates, and
/// registers them into a [`ServiceRegistry`].
pub struct DiscoveryEngine {
    sources: Vec<Arc<dyn DiscoverySource>>,
    registry: Arc<ServiceRegistry>,
    http: reqwest::Client,
    config: DiscoveryConfig,
    seen: RwLock<HashMap<String, Attempts>>,
}

impl DiscoveryEngine {
    /// Build an engine running `sources` against `registry`.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn DiscoverySource>>, registry: Arc<ServiceRegistry>, config: DiscoveryConfig) -> Self {
        Self {
            sources,
            registry,
            http: reqwest::Client::new(),
            config,
            seen: RwLock::new(HashMap::new()),
        }
    }

    /// Run one discovery cycle across every source, probing and registering
    /// new candidates. Already-registered candidates only update `last_seen`.
    pub async fn run_once(&self) {
        for source in &self.sources {
            match source.discover().await {
                Ok(candidates) => {
                    info!(source = %source.name(), count = candidates.len(), "discovery cycle");
                    for candidate in candidates {
                        self.handle_candidate(candidate).await;
                    }
                }
                Err(e) => warn!(source = %source.name(), error = %e, "discovery source failed"),
            }
        }
    }

    async fn handle_candidate(&self, candidate: DiscoveredService) {
        let registry_id = format!("{}:{}", candidate.source, candidate.id);

        if self.registry.get(&registry_id).is_some() {
            let mut seen = self.seen.write();
            if let Some(attempts) = seen.get_mut(&registry_id) {
                attempts.last_seen_epoch_ms = epoch_millis_now();
            }
            return;
        }

        let registration = match self.probe_with_retry(&candidate).await {
            Ok(capabilities) => {
                self.registry
                    .register(
                        registry_id.clone(),
                        candidate.base_url(),
                        ProviderOrigin::Discovered,
                        None,
                        1,
                        CircuitBreakerConfig::default(),
                        capabilities,
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match registration {
            Ok(_) => {
                self.seen.write().insert(registry_id, Attempts { count: 0, last_seen_epoch_ms: epoch_millis_now() });
            }
            Err(e) => {
                warn!(provider = %registry_id, error = %e, "discovery candidate rejected");
                let mut seen = self.seen.write();
                let attempts = seen.entry(registry_id).or_insert(Attempts { count: 0, last_seen_epoch_ms: 0 });
                attempts.count += 1;
            }
        }
    }

    async fn probe_with_retry(&self, candidate: &DiscoveredService) -> Result<Vec<CapabilityDescriptor>> {
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_interval * attempt).await;
            }
            match self.probe(candidate).await {
                Ok(caps) => return Ok(caps),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::internal("discovery probe exhausted retries with no recorded error")))
    }

    async fn probe(&self, candidate: &DiscoveredService) -> Result<Vec<CapabilityDescriptor>> {
        let base = candidate.base_url();
        let mut capabilities = Vec::new();

        capabilities.extend(self.probe_endpoint(&base, "tools", "tools", CapabilityKind::Tool).await?);
        capabilities.extend(self.probe_endpoint(&base, "resources", "resources", CapabilityKind::Resource).await?);
        capabilities.extend(self.probe_endpoint(&base, "prompts", "prompts", CapabilityKind::Prompt).await?);

        if capabilities.iter().any(|d| d.name.is_empty()) {
            return Err(Error::InvalidRecord(format!("{base} advertised a capability with an empty name")));
        }

        Ok(capabilities)
    }

    async fn probe_endpoint(&self, base: &str, path: &str, field: &str, kind: CapabilityKind) -> Result<Vec<CapabilityDescriptor>> {
        let url = format!("{base}/{path}");
        let response = tokio::time::timeout(self.config.probe_timeout, self.http.get(&url).send())
            .await
            .map_err(|_| Error::Timeout(format!("probing {url} timed out")))?
            .map_err(|e| Error::Transport(format!("probing {url} failed: {e}")))?;

        if !response.status().is_success() {
            // Not every provider offers every capability kind; a 404 just means "none".
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("invalid JSON from {url}: {e}")))?;

        let entries = body.get(field).and_then(serde_json::Value::as_array).cloned().unwrap_or_default();
        entries
            .into_iter()
            .map(|entry| {
                let mut descriptor: CapabilityDescriptor = serde_json::from_value(entry)
                    .map_err(|e| Error::invalid_params(format!("malformed descriptor from {url}: {e}")))?;
                descriptor.kind = kind;
                Ok(descriptor)
            })
            .collect()
    }
}

fn epoch_millis_now() -> u64 {
    #[allow(clippy::cast_possible_truncation)]
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptySource;

    #[async_trait]
    impl DiscoverySource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }
        async fn discover(&self) -> Result<Vec<DiscoveredService>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn run_once_with_no_candidates_registers_nothing() {
        let registry = Arc::new(ServiceRegistry::new());
        let engine = DiscoveryEngine::new(vec![Arc::new(EmptySource)], Arc::clone(&registry), DiscoveryConfig::default());
        engine.run_once().await;
        assert_eq!(registry.provider_count(), 0);
    }

    #[test]
    fn base_url_formats_host_and_port() {
        let service = DiscoveredService {
            id: "a".to_string(),
            name: "a".to_string(),
            service_type: None,
            address: "10.0.0.1".to_string(),
            port: Some(8080),
            protocol: "http".to_string(),
            tags: vec![],
            metadata: HashMap::new(),
            source: "static".to_string(),
        };
        assert_eq!(service.base_url(), "http://10.0.0.1:8080");
    }
}
