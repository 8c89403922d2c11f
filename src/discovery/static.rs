//! Static discovery source: fixed endpoints from configuration, parsed once
//! and returned unchanged every cycle.

use async_trait::async_trait;
use url::Url;

use super::{DiscoveredService, DiscoverySource};
use crate::{Error, Result};

/// Discovery source backed by a fixed list of `scheme://host:port` endpoints.
pub struct StaticSource {
    endpoints: Vec<DiscoveredService>,
}

impl StaticSource {
    /// Parse `endpoints` (each `scheme://host:port`) into discovered services.
    pub fn new(endpoints: &[String]) -> Result<Self> {
        let parsed = endpoints
            .iter()
            .map(|raw| {
                let url = Url::parse(raw).map_err(|e| Error::Config(format!("invalid static endpoint '{raw}': {e}")))?;
                let host = url.host_str().ok_or_else(|| Error::Config(format!("static endpoint '{raw}' has no host")))?;
                Ok(DiscoveredService {
                    id: raw.clone(),
                    name: host.to_string(),
                    service_type: None,
                    address: host.to_string(),
                    port: url.port(),
                    protocol: url.scheme().to_string(),
                    tags: vec![],
                    metadata: std::collections::HashMap::new(),
                    source: "static".to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { endpoints: parsed })
    }
}

#[async_trait]
impl DiscoverySource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn discover(&self) -> Result<Vec<DiscoveredService>> {
        Ok(self.endpoints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_scheme_host_port_endpoints() {
        let source = StaticSource::new(&["http://localhost:9000".to_string()]).unwrap();
        let services = source.discover().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].address, "localhost");
        assert_eq!(services[0].port, Some(9000));
        assert_eq!(services[0].protocol, "http");
    }

    #[test]
    fn rejects_malformed_endpoint() {
        let err = StaticSource::new(&["not a url".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
