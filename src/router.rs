//! MCP Router: decodes, validates, dispatches, and aggregates JSON-RPC 2.0
//! traffic across the registry's providers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_core::{CapabilityDescriptor, CapabilityKind};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::info;

use crate::balancer::LoadBalancer;
use crate::context::{InboundHeaders, RequestContext};
use crate::plugin::PluginManager;
use crate::protocol::{
    InitializeResult, JsonRpcInbound, JsonRpcResponse, PROTOCOL_VERSION, PromptsCapability, RequestId, ResourcesCapability,
    ServerCapabilities, ToolsCapability,
};
use crate::registry::{ProviderOrigin, ServiceRegistry};
use crate::{Error, Result};

/// Field read from an invocation's `arguments` object to drive
/// [`crate::balancer::Strategy::Hash`] routing, e.g. to keep a session
/// pinned to the same replica.
const HASH_KEY_FIELD: &str = "session_id";

/// Router-wide settings not owned by any single capability's config.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Name advertised in `initialize` responses.
    pub server_name: String,
    /// Version advertised in `initialize` responses.
    pub server_version: String,
    /// Upper bound on a single request's deadline, regardless of what the
    /// client's `X-Timeout` header requests.
    #[serde(with = "crate::config::humantime_serde")]
    pub max_deadline: Duration,
    /// Bounded worker pool size; excess concurrent requests are rejected
    /// with `-32003` rather than queued.
    pub max_concurrent_requests: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            server_name: "mcp-gateway".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            max_deadline: Duration::from_secs(30),
            max_concurrent_requests: 100,
        }
    }
}

/// Routes decoded JSON-RPC traffic to providers via the registry, load
/// balancer, and plugin manager, and shapes replies back into JSON-RPC.
pub struct Router {
    registry: Arc<ServiceRegistry>,
    balancer: LoadBalancer,
    plugins: Arc<PluginManager>,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
    config: RouterConfig,
}

impl Router {
    /// Build a router dispatching through `registry`/`plugins`, using
    /// `balancer`'s configured strategy to pick among healthy candidates.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, balancer: LoadBalancer, plugins: Arc<PluginManager>, config: RouterConfig) -> Self {
        Self {
            registry,
            balancer,
            plugins,
            http: reqwest::Client::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            config,
        }
    }

    /// Handle one inbound HTTP body, which may be a single JSON-RPC object
    /// or a batch array. Returns `None` when the body was a lone
    /// notification (no reply expected).
    pub async fn handle(&self, body: &[u8], headers: &InboundHeaders) -> Option<Value> {
        let value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => return Some(serde_json::to_value(JsonRpcResponse::error(None, -32700, format!("parse error: {e}"))).unwrap()),
        };

        match value {
            Value::Array(items) => Some(self.handle_batch(items, headers).await),
            single => self.handle_single(single, headers).await.map(|r| serde_json::to_value(r).unwrap()),
        }
    }

    async fn handle_batch(&self, items: Vec<Value>, headers: &InboundHeaders) -> Value {
        if items.is_empty() {
            return serde_json::to_value(JsonRpcResponse::error(None, -32600, "batch must not be empty")).unwrap();
        }

        let futures = items.into_iter().map(|item| self.handle_single(item, headers));
        let replies: Vec<Option<JsonRpcResponse>> = futures::future::join_all(futures).await;

        Value::Array(replies.into_iter().flatten().map(|r| serde_json::to_value(r).unwrap()).collect())
    }

    async fn handle_single(&self, value: Value, headers: &InboundHeaders) -> Option<JsonRpcResponse> {
        let inbound: JsonRpcInbound = match serde_json::from_value(value) {
            Ok(i) => i,
            Err(_) => return Some(JsonRpcResponse::error(None, -32600, "invalid JSON-RPC request")),
        };

        if !matches!(&inbound, JsonRpcInbound::Request(r) if r.jsonrpc == "2.0") && !matches!(&inbound, JsonRpcInbound::Notification(n) if n.jsonrpc == "2.0") {
            return Some(JsonRpcResponse::error(inbound.id().cloned(), -32600, "jsonrpc must be \"2.0\""));
        }

        let Ok(_permit) = self.permits.clone().try_acquire_owned() else {
            return inbound.id().cloned().map(|id| JsonRpcResponse::error(Some(id), -32003, "worker pool saturated"));
        };

        let ctx = RequestContext::new(headers, self.config.max_deadline);
        let start = Instant::now();
        let method = inbound.method().to_string();
        let id = inbound.id().cloned();

        let outcome = self.dispatch(&inbound, &ctx).await;

        let duration_ms = start.elapsed().as_millis();
        let outcome_label = if outcome.is_ok() { "ok" } else { "error" };
        telemetry_metrics::counter!("mcp_gateway_requests_total", "method" => method.clone(), "outcome" => outcome_label).increment(1);
        telemetry_metrics::histogram!("mcp_gateway_request_duration_ms", "method" => method.clone()).record(duration_ms as f64);
        match &outcome {
            Ok(_) => info!(request_id = %ctx.request_id, method = %method, outcome = "ok", duration_ms, "request handled"),
            Err(e) => info!(request_id = %ctx.request_id, method = %method, outcome = "error", code = e.to_rpc_code(), duration_ms, "request handled"),
        }

        match id {
            None => None,
            Some(id) => Some(match outcome {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => error_to_response(Some(id), e),
            }),
        }
    }

    async fn dispatch(&self, inbound: &JsonRpcInbound, ctx: &RequestContext) -> Result<Value> {
        let params = inbound.params().cloned();

        match inbound.method() {
            "initialize" => Ok(serde_json::to_value(self.initialize_result())?),
            "ping" => Ok(json!({})),
            "notifications/cancelled" => {
                ctx.cancellation.cancel();
                Ok(Value::Null)
            }
            "tools/list" => Ok(self.aggregate(CapabilityKind::Tool, "tools")),
            "resources/list" => Ok(self.aggregate(CapabilityKind::Resource, "resources")),
            "prompts/list" => Ok(self.aggregate(CapabilityKind::Prompt, "prompts")),
            "tools/call" => self.invoke_named(CapabilityKind::Tool, params, "name", "arguments", ctx).await,
            "prompts/get" => self.invoke_named(CapabilityKind::Prompt, params, "name", "arguments", ctx).await,
            "resources/read" => self.invoke_named(CapabilityKind::Resource, params, "uri", "arguments", ctx).await,
            "resources/subscribe" => self.invoke_named(CapabilityKind::Resource, params, "uri", "arguments", ctx).await,
            other => Err(Error::method_not_found(other)),
        }
    }

    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
                resources: Some(ResourcesCapability { subscribe: true, list_changed: true }),
                prompts: Some(PromptsCapability { list_changed: true }),
            },
            server_info: crate::protocol::Info {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
        }
    }

    /// Merge every provider's descriptors of `kind`, deduplicated by
    /// `<provider>.<name>` address (ties: higher weight, then newer).
    fn aggregate(&self, kind: CapabilityKind, field: &str) -> Value {
        use std::collections::HashMap;

        struct Candidate {
            descriptor: CapabilityDescriptor,
            weight: u32,
            registered_at: u64,
        }

        let mut winners: HashMap<String, Candidate> = HashMap::new();
        for (address, descriptor) in self.registry.list_capabilities(kind) {
            let Some(provider_id) = address.split('.').next() else { continue };
            let Some(record) = self.registry.get(provider_id) else { continue };
            let candidate = Candidate {
                descriptor,
                weight: record.stats.weight,
                registered_at: record.registered_at_epoch_ms(),
            };
            winners
                .entry(address)
                .and_modify(|existing| {
                    if (candidate.weight, candidate.registered_at) > (existing.weight, existing.registered_at) {
                        *existing = Candidate { descriptor: candidate.descriptor.clone(), weight: candidate.weight, registered_at: candidate.registered_at };
                    }
                })
                .or_insert(candidate);
        }

        let mut entries: Vec<(String, CapabilityDescriptor)> = winners.into_iter().map(|(addr, c)| (addr, c.descriptor)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let descriptors: Vec<Value> = entries.into_iter().map(|(_, d)| serde_json::to_value(d).unwrap_or(Value::Null)).collect();
        json!({ field: descriptors })
    }

    /// Resolve `name_field` (bare or `<provider>.<name>`-addressed) to a
    /// provider, admit via its circuit breaker, and dispatch.
    async fn invoke_named(&self, kind: CapabilityKind, params: Option<Value>, name_field: &str, args_field: &str, ctx: &RequestContext) -> Result<Value> {
        let params = params.ok_or_else(|| Error::invalid_params("missing params"))?;
        let name = params
            .get(name_field)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_params(format!("missing required field '{name_field}'")))?;
        let args = params.get(args_field).cloned().unwrap_or(Value::Object(serde_json::Map::new()));
        let hash_key = args.get(HASH_KEY_FIELD).and_then(Value::as_str);

        let (provider_id, bare_name) = self.resolve_address(kind, name, hash_key)?;
        self.dispatch_to_provider(&provider_id, &bare_name, args, ctx).await
    }

    /// Resolve `name` (bare, or `<provider>.<name>`-addressed) to a single
    /// `(provider_id, bare_name)`, picking among multiple candidate
    /// providers of the same capability via C5 lookup → C4 pick, as the
    /// request path requires.
    fn resolve_address(&self, kind: CapabilityKind, name: &str, hash_key: Option<&str>) -> Result<(String, String)> {
        if let Some((prefix, bare)) = name.rsplit_once('.') {
            if self.registry.get(prefix).is_some() {
                return Ok((prefix.to_string(), bare.to_string()));
            }
        }

        let candidate_ids = self.registry.lookup(kind, name);
        if candidate_ids.is_empty() {
            return Err(Error::method_not_found_with_candidates(format!("no provider offers '{name}'"), self.nearby_capability_names(kind)));
        }

        let records: Vec<_> = candidate_ids.iter().filter_map(|id| self.registry.get(id)).collect();
        let pairs: Vec<(&str, &crate::balancer::InstanceStats)> = records.iter().map(|r| (r.id.as_str(), &r.stats)).collect();
        let healthy = self.balancer.healthy_candidates(&pairs);
        if healthy.is_empty() {
            return Err(Error::ProviderUnavailable(format!("no healthy provider offers '{name}'")));
        }

        let stats_of = |id: &str| -> &crate::balancer::InstanceStats {
            &records.iter().find(|r| r.id == id).expect("pick only returns ids passed to it").stats
        };
        let picked = self
            .balancer
            .pick(&healthy, hash_key, stats_of)
            .ok_or_else(|| Error::ProviderUnavailable(format!("no healthy provider offers '{name}'")))?;

        Ok((picked.to_string(), name.to_string()))
    }

    /// Registered capability addresses of `kind`, offered as suggestions when
    /// a requested name doesn't match any provider.
    fn nearby_capability_names(&self, kind: CapabilityKind) -> Vec<String> {
        let mut names: Vec<String> = self.registry.list_capabilities(kind).into_iter().map(|(address, _)| address).collect();
        names.sort();
        names
    }

    async fn dispatch_to_provider(&self, provider_id: &str, bare_name: &str, args: Value, ctx: &RequestContext) -> Result<Value> {
        let record = self.registry.get(provider_id).ok_or_else(|| Error::ProviderUnavailable(provider_id.to_string()))?;

        if !record.circuit.try_acquire() {
            return Err(Error::ProviderUnavailable(format!("{provider_id} circuit is open")));
        }
        if ctx.is_expired() {
            record.circuit.record_failure();
            return Err(Error::Timeout(format!("deadline exceeded before dispatching to {provider_id}")));
        }

        record.stats.start();
        let start = Instant::now();

        let result = match record.origin {
            ProviderOrigin::Plugin => self.plugins.invoke(provider_id, bare_name, args).await,
            ProviderOrigin::Static | ProviderOrigin::Discovered => self.dispatch_external(&record.address, bare_name, args, ctx).await,
        };

        let success = result.as_ref().map(|_| true).unwrap_or_else(|e| !e.counts_as_circuit_failure());
        record.stats.finish(success, start.elapsed());
        if success {
            record.circuit.record_success();
        } else {
            record.circuit.record_failure();
        }
        record.stats.set_circuit_open(record.circuit.state() != crate::circuit::CircuitState::Closed);

        result
    }

    async fn dispatch_external(&self, address: &str, method: &str, args: Value, ctx: &RequestContext) -> Result<Value> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": args});
        let remaining = ctx.remaining();

        let response = tokio::time::timeout(
            remaining,
            self.http
                .post(address)
                .header("X-Trace-Id", ctx.trace_id.clone())
                .header("X-Request-Id", ctx.request_id.clone())
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| Error::Timeout(format!("{address} exceeded {remaining:?}")))?
        .map_err(|e| Error::Transport(format!("{address} unreachable: {e}")))?;

        let parsed: JsonRpcResponse = response.json().await.map_err(|e| Error::Transport(format!("malformed reply from {address}: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(Error::ProviderError { code: err.code, message: err.message, data: err.data });
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

fn error_to_response(id: Option<RequestId>, e: Error) -> JsonRpcResponse {
    let code = e.to_rpc_code();
    match e {
        Error::InvalidParams { message, candidates } if !candidates.is_empty() => {
            JsonRpcResponse::error_with_data(id, code, message, json!({"candidates": candidates}))
        }
        Error::MethodNotFound { name, candidates } if !candidates.is_empty() => {
            JsonRpcResponse::error_with_data(id, code, format!("method not found: {name}"), json!({"candidates": candidates}))
        }
        Error::Internal { cause } => JsonRpcResponse::error_with_data(id, code, "internal error", json!({"cause": cause})),
        Error::ProviderError { message, data, .. } => match data {
            Some(data) => JsonRpcResponse::error_with_data(id, code, message, data),
            None => JsonRpcResponse::error(id, code, message),
        },
        other => JsonRpcResponse::error(id, code, other.to_string()),
    }
}
