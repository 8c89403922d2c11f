//! KV/health-registry discovery source: polls a Consul-style
//! `/v1/health/service/<name>?passing=true` endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{DiscoveredService, DiscoverySource};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct HealthServiceEntry {
    #[serde(rename = "Service")]
    service: ServiceBlock,
}

#[derive(Debug, Deserialize)]
struct ServiceBlock {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    name: String,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags", default)]
    tags: Vec<String>,
}

/// Discovery source polling a health-registry HTTP endpoint for one service name.
pub struct KvHealthSource {
    registry_base_url: String,
    service_name: String,
    http: reqwest::Client,
}

impl KvHealthSource {
    /// Build a source polling `registry_base_url` for `service_name`.
    #[must_use]
    pub fn new(registry_base_url: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            registry_base_url: registry_base_url.into(),
            service_name: service_name.into(),
            http: reqwest::Client::new(),
        }
    }

    fn tag_value<'a>(tags: &'a [String], prefix: &str) -> Option<&'a str> {
        tags.iter().find_map(|t| t.strip_prefix(prefix))
    }
}

#[async_trait]
impl DiscoverySource for KvHealthSource {
    fn name(&self) -> &str {
        "kv-health"
    }

    async fn discover(&self) -> Result<Vec<DiscoveredService>> {
        let url = format!("{}/v1/health/service/{}?passing=true", self.registry_base_url, self.service_name);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("kv-health registry unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!("kv-health registry returned {}", response.status())));
        }

        let entries: Vec<HealthServiceEntry> = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("malformed kv-health response: {e}")))?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let service_type = Self::tag_value(&entry.service.tags, "mcp-type:").map(str::to_string);
                let protocol = Self::tag_value(&entry.service.tags, "protocol:").unwrap_or("http").to_string();
                DiscoveredService {
                    id: entry.service.id,
                    name: entry.service.name,
                    service_type,
                    address: entry.service.address,
                    port: Some(entry.service.port),
                    protocol,
                    tags: entry.service.tags,
                    metadata: HashMap::new(),
                    source: "kv-health".to_string(),
                }
            })
            .collect())
    }
}
