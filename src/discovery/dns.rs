//! DNS-SRV discovery source: resolves `_<service>._tcp.<domain>`-style SRV
//! records into candidate providers.

use std::collections::HashMap;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;

use super::{DiscoveredService, DiscoverySource};
use crate::{Error, Result};

/// Discovery source that resolves a service name against one or more DNS domains.
pub struct DnsSrvSource {
    service_name: String,
    domains: Vec<String>,
    resolver: TokioAsyncResolver,
}

impl DnsSrvSource {
    /// Build a source looking up `service_name` under each of `domains`.
    pub fn new(service_name: impl Into<String>, domains: Vec<String>) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Config(format!("failed to load system DNS resolver config: {e}")))?;
        Ok(Self {
            service_name: service_name.into(),
            domains,
            resolver,
        })
    }
}

#[async_trait]
impl DiscoverySource for DnsSrvSource {
    fn name(&self) -> &str {
        "dns-srv"
    }

    async fn discover(&self) -> Result<Vec<DiscoveredService>> {
        let mut found = Vec::new();

        for domain in &self.domains {
            let query = format!("{}.{domain}", self.service_name);
            let lookup = match self.resolver.srv_lookup(&query).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    tracing::debug!(query = %query, error = %e, "SRV lookup returned no records");
                    continue;
                }
            };

            for record in lookup.iter() {
                let target = record.target().to_utf8();
                let host = target.trim_end_matches('.').to_string();
                found.push(DiscoveredService {
                    id: format!("{host}:{}", record.port()),
                    name: host.clone(),
                    service_type: Some(self.service_name.clone()),
                    address: host,
                    port: Some(record.port()),
                    protocol: "http".to_string(),
                    tags: vec![],
                    metadata: HashMap::from([("domain".to_string(), domain.clone())]),
                    source: "dns-srv".to_string(),
                });
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_name_is_dns_srv() {
        if let Ok(source) = DnsSrvSource::new("mcp", vec!["example.com".to_string()]) {
            assert_eq!(source.name(), "dns-srv");
        }
    }
}
