//! Process-root orchestrator: wires the service registry, plugin manager,
//! discovery engine, and router together, and serves them over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::context::InboundHeaders;
use crate::discovery::{ClusterApiSource, DiscoveryEngine, DiscoverySource, DnsSrvSource, KvHealthSource, StaticSource};
use crate::plugin::{EditorPlugin, GitPlugin, MemoryPlugin, PluginManager};
use crate::registry::ServiceRegistry;
use crate::router::Router;
use crate::{Error, Result};

/// Owns every long-lived component and drives the HTTP server lifecycle.
pub struct Gateway {
    config: Config,
    registry: Arc<ServiceRegistry>,
    plugins: Arc<PluginManager>,
    discovery: Arc<DiscoveryEngine>,
    router: Arc<Router>,
}

struct AppState {
    router: Arc<Router>,
}

impl Gateway {
    /// Build the gateway: load built-in plugins and assemble the discovery
    /// sources named in config. Does not bind a socket or start background
    /// tasks; call [`Self::run`] for that.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured built-in plugin fails to initialize
    /// or a discovery source fails to construct (e.g. a malformed static
    /// endpoint or unreachable DNS resolver config).
    pub async fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(ServiceRegistry::new());
        let plugins = Arc::new(PluginManager::new(Arc::clone(&registry)));

        if config.plugins.memory.enabled {
            let memory = MemoryPlugin::new("memory", PathBuf::from(&config.plugins.memory.store_path));
            plugins.load(Arc::new(memory)).await?;
        }
        if config.plugins.git.enabled {
            let git = GitPlugin::new("git", PathBuf::from(&config.plugins.git.repo_path)).with_timeout(config.plugins.git.timeout);
            plugins.load(Arc::new(git)).await?;
        }
        if config.plugins.editor.enabled {
            let editor = EditorPlugin::new(
                "editor",
                PathBuf::from(&config.plugins.editor.base_path),
                config.plugins.editor.allow.clone(),
                config.plugins.editor.deny.clone(),
            )
            .with_max_file_size(config.plugins.editor.max_file_size);
            plugins.load(Arc::new(editor)).await?;
        }

        let mut sources: Vec<Arc<dyn DiscoverySource>> = Vec::new();
        if !config.discovery.static_addresses.is_empty() {
            sources.push(Arc::new(StaticSource::new(&config.discovery.static_addresses)?));
        }
        if let Some(dns) = &config.discovery.dns {
            sources.push(Arc::new(DnsSrvSource::new(dns.service_name.clone(), dns.domains.clone())?));
        }
        if let Some(kv) = &config.discovery.kv {
            sources.push(Arc::new(KvHealthSource::new(kv.registry_base_url.clone(), kv.service_name.clone())));
        }
        if let Some(cluster) = &config.discovery.cluster {
            sources.push(Arc::new(ClusterApiSource::new(
                cluster.api_server.clone(),
                cluster.namespace.clone(),
                cluster.label_selector.clone(),
                PathBuf::from(&cluster.token_path),
                cluster.ca_cert_path.clone().map(PathBuf::from),
            )));
        }
        let discovery = Arc::new(DiscoveryEngine::new(sources, Arc::clone(&registry), config.discovery.clone()));

        let balancer = crate::balancer::LoadBalancer::new(config.balancer.strategy);
        let router = Arc::new(Router::new(Arc::clone(&registry), balancer, Arc::clone(&plugins), config.router.clone()));

        Ok(Self {
            config,
            registry,
            plugins,
            discovery,
            router,
        })
    }

    /// Bind the HTTP listener, run discovery in the background, and serve
    /// until a shutdown signal arrives, then drain and stop plugins.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured host/port cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config.server.host.parse().map_err(|e| Error::Config(format!("invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let discovery = Arc::clone(&self.discovery);
        let poll_interval = self.config.discovery.poll_interval;
        let mut discovery_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => discovery.run_once().await,
                    _ = discovery_shutdown.recv() => break,
                }
            }
        });

        let registry = Arc::clone(&self.registry);
        let plugins = Arc::clone(&self.plugins);
        let registry_config = self.config.registry.clone();
        let mut health_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry_config.health_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.health_tick(&plugins, &registry_config.health_path, registry_config.health_timeout).await;
                    }
                    _ = health_shutdown.recv() => break,
                }
            }
        });

        let state = Arc::new(AppState { router: Arc::clone(&self.router) });
        let app = AxumRouter::new()
            .route("/health", get(health_handler))
            .route("/mcp", post(mcp_handler))
            .with_state(state);

        let listener = TcpListener::bind(addr).await.map_err(|e| Error::Transport(format!("failed to bind {addr}: {e}")))?;
        info!(host = %self.config.server.host, port = %self.config.server.port, "gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::internal(e.to_string()))?;

        info!(timeout = ?self.config.server.shutdown_timeout, "draining plugins");
        tokio::time::timeout(self.config.server.shutdown_timeout, self.plugins.stop_all())
            .await
            .unwrap_or_else(|_| warn!("plugin drain timed out"));

        info!(providers = self.registry.provider_count(), "gateway shutdown complete");
        Ok(())
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn mcp_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, body: axum::body::Bytes) -> (StatusCode, Json<Value>) {
    let inbound = headers_to_inbound(&headers);
    match state.router.handle(&body, &inbound).await {
        Some(value) => (StatusCode::OK, Json(value)),
        None => (StatusCode::ACCEPTED, Json(Value::Null)),
    }
}

fn headers_to_inbound(headers: &HeaderMap) -> InboundHeaders {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    InboundHeaders {
        request_id: get("x-request-id"),
        correlation_id: get("x-correlation-id"),
        trace_id: get("x-trace-id"),
        span_id: get("x-span-id"),
        timeout_ms: headers.get("x-timeout").and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok()),
        authorization: get("authorization"),
        api_key: get("x-api-key"),
        remote_addr: None,
    }
}

async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    let _ = shutdown_tx.send(());
}
