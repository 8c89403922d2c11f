//! Cluster-API discovery source: lists services in a Kubernetes-style
//! cluster, gated on the presence of a service-account token file.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use super::{DiscoveredService, DiscoverySource};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct ServiceList {
    items: Vec<ServiceItem>,
}

#[derive(Debug, Deserialize)]
struct ServiceItem {
    metadata: ServiceMetadata,
    spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
struct ServiceMetadata {
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ServiceSpec {
    #[serde(rename = "clusterIP")]
    cluster_ip: Option<String>,
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    port: u16,
}

/// Discovery source listing services in a cluster namespace, only active
/// when a service-account token is mounted (i.e. running in-cluster).
pub struct ClusterApiSource {
    api_server: String,
    namespace: String,
    label_selector: Option<String>,
    token_path: PathBuf,
    ca_cert_path: Option<PathBuf>,
    http: reqwest::Client,
}

impl ClusterApiSource {
    /// Build a source against `api_server`, listing `namespace` filtered by
    /// `label_selector`. Looks for the service-account token at `token_path`
    /// (typically `/var/run/secrets/kubernetes.io/serviceaccount/token`).
    #[must_use]
    pub fn new(api_server: impl Into<String>, namespace: impl Into<String>, label_selector: Option<String>, token_path: PathBuf, ca_cert_path: Option<PathBuf>) -> Self {
        Self {
            api_server: api_server.into(),
            namespace: namespace.into(),
            label_selector,
            token_path,
            ca_cert_path,
            http: reqwest::Client::new(),
        }
    }

    fn is_mcp_service(metadata: &ServiceMetadata) -> bool {
        metadata.annotations.get("mcp-service").map(String::as_str) == Some("true")
            || metadata.labels.get("app").is_some_and(|app| app.starts_with("mcp"))
    }
}

#[async_trait]
impl DiscoverySource for ClusterApiSource {
    fn name(&self) -> &str {
        "cluster-api"
    }

    async fn discover(&self) -> Result<Vec<DiscoveredService>> {
        if !self.token_path.exists() {
            // Not running in-cluster; this source is simply inactive.
            return Ok(Vec::new());
        }
        let _ = &self.ca_cert_path;

        let token = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|e| Error::Transport(format!("failed to read service-account token: {e}")))?;

        let mut url = format!("{}/api/v1/namespaces/{}/services", self.api_server, self.namespace);
        if let Some(selector) = &self.label_selector {
            url.push_str(&format!("?labelSelector={selector}"));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(token.trim())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("cluster API unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!("cluster API returned {}", response.status())));
        }

        let list: ServiceList = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("malformed cluster API response: {e}")))?;

        Ok(list
            .items
            .into_iter()
            .filter(|item| Self::is_mcp_service(&item.metadata))
            .filter_map(|item| {
                let address = item.spec.cluster_ip?;
                let port = item.spec.ports.first().map(|p| p.port)?;
                Some(DiscoveredService {
                    id: item.metadata.name.clone(),
                    name: item.metadata.name,
                    service_type: None,
                    address,
                    port: Some(port),
                    protocol: "http".to_string(),
                    tags: Vec::new(),
                    metadata: item.metadata.labels,
                    source: "cluster-api".to_string(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_label_starting_with_mcp_is_recognized() {
        let metadata = ServiceMetadata {
            name: "x".to_string(),
            labels: HashMap::from([("app".to_string(), "mcp-search".to_string())]),
            annotations: HashMap::new(),
        };
        assert!(ClusterApiSource::is_mcp_service(&metadata));
    }

    #[test]
    fn annotation_flag_is_recognized() {
        let metadata = ServiceMetadata {
            name: "x".to_string(),
            labels: HashMap::new(),
            annotations: HashMap::from([("mcp-service".to_string(), "true".to_string())]),
        };
        assert!(ClusterApiSource::is_mcp_service(&metadata));
    }

    #[tokio::test]
    async fn discover_is_inactive_without_token_file() {
        let source = ClusterApiSource::new("https://cluster.local", "default", None, PathBuf::from("/nonexistent/token"), None);
        let services = source.discover().await.unwrap();
        assert!(services.is_empty());
    }
}
