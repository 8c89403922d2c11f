//! End-to-end tests driving the router through its public `handle` entry
//! point, over a registry wired with the memory plugin and synthetic
//! external providers.

use std::sync::Arc;
use std::time::Duration;

use gateway_core::{CapabilityDescriptor, CapabilityKind};
use mcp_gateway::balancer::{LoadBalancer, Strategy};
use mcp_gateway::circuit::CircuitBreakerConfig;
use mcp_gateway::context::InboundHeaders;
use mcp_gateway::plugin::{MemoryPlugin, PluginManager};
use mcp_gateway::registry::{ProviderOrigin, ServiceRegistry};
use mcp_gateway::router::{Router, RouterConfig};

fn tool_descriptor(name: &str) -> CapabilityDescriptor {
    CapabilityDescriptor {
        name: name.to_string(),
        kind: CapabilityKind::Tool,
        input_schema: None,
        output_hint: None,
        version: None,
        tags: vec![],
        description: None,
    }
}

async fn router_with_memory_plugin() -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ServiceRegistry::new());
    let plugins = Arc::new(PluginManager::new(Arc::clone(&registry)));
    let memory = MemoryPlugin::new("memory", dir.path().join("memory.json"));
    plugins.load(Arc::new(memory)).await.unwrap();

    let balancer = LoadBalancer::new(Strategy::RoundRobin);
    let router = Router::new(registry, balancer, plugins, RouterConfig::default());
    (router, dir)
}

#[tokio::test]
async fn initialize_returns_configured_server_name_and_protocol_version() {
    let (router, _dir) = router_with_memory_plugin().await;
    let headers = InboundHeaders::default();
    let body = br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{}}}"#;

    let reply = router.handle(body, &headers).await.unwrap();
    assert_eq!(reply["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(reply["result"]["serverInfo"]["name"], "mcp-gateway");
}

#[tokio::test]
async fn tools_list_with_only_memory_plugin_reports_its_tools() {
    let (router, _dir) = router_with_memory_plugin().await;
    let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;

    let reply = router.handle(body, &InboundHeaders::default()).await.unwrap();
    let tools = reply["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 5, "memory plugin advertises 5 tools");
}

#[tokio::test]
async fn memory_store_then_retrieve_round_trips_through_the_router() {
    let (router, _dir) = router_with_memory_plugin().await;
    let headers = InboundHeaders::default();

    let store = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"memory_store","arguments":{"key":"a","value":"1"}}}"#;
    let reply = router.handle(store, &headers).await.unwrap();
    assert!(reply.get("error").is_none(), "store must succeed: {reply:?}");

    let retrieve = br#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"memory_retrieve","arguments":{"key":"a"}}}"#;
    let reply = router.handle(retrieve, &headers).await.unwrap();
    let text = serde_json::to_string(&reply["result"]).unwrap();
    assert!(text.contains('1'), "retrieve must surface the stored value: {text}");
}

#[tokio::test]
async fn empty_batch_returns_invalid_request() {
    let (router, _dir) = router_with_memory_plugin().await;
    let reply = router.handle(b"[]", &InboundHeaders::default()).await.unwrap();
    assert_eq!(reply["error"]["code"], -32600);
}

#[tokio::test]
async fn batch_of_three_preserves_order_and_completes_concurrently() {
    let (router, _dir) = router_with_memory_plugin().await;
    let body = br#"[
        {"jsonrpc":"2.0","id":1,"method":"tools/list"},
        {"jsonrpc":"2.0","id":2,"method":"ping"},
        {"jsonrpc":"2.0","id":3,"method":"no/such/method"}
    ]"#;

    let reply = router.handle(body, &InboundHeaders::default()).await.unwrap();
    let replies = reply.as_array().unwrap();
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["id"], 1);
    assert!(replies[0]["result"]["tools"].is_array());
    assert_eq!(replies[1]["id"], 2);
    assert!(replies[1]["result"].is_object());
    assert_eq!(replies[2]["id"], 3);
    assert_eq!(replies[2]["error"]["code"], -32601);
}

#[tokio::test]
async fn unknown_tool_name_returns_method_not_found() {
    let (router, _dir) = router_with_memory_plugin().await;
    let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"does_not_exist","arguments":{}}}"#;
    let reply = router.handle(body, &InboundHeaders::default()).await.unwrap();
    assert_eq!(reply["error"]["code"], -32601);
}

#[tokio::test]
async fn ambiguous_bare_name_across_two_providers_reports_candidates() {
    let registry = Arc::new(ServiceRegistry::new());
    let plugins = Arc::new(PluginManager::new(Arc::clone(&registry)));
    registry.register("alpha", "http://alpha", ProviderOrigin::Discovered, 1, CircuitBreakerConfig::default(), vec![tool_descriptor("search")]);
    registry.register("beta", "http://beta", ProviderOrigin::Discovered, 1, CircuitBreakerConfig::default(), vec![tool_descriptor("search")]);

    let balancer = LoadBalancer::new(Strategy::RoundRobin);
    let router = Router::new(registry, balancer, plugins, RouterConfig::default());
    let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"search","arguments":{}}}"#;

    let reply = router.handle(body, &InboundHeaders::default()).await.unwrap();
    assert_eq!(reply["error"]["code"], -32602);
    let candidates = reply["error"]["data"]["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 2);
    assert!(candidates.contains(&serde_json::json!("alpha.search")));
    assert!(candidates.contains(&serde_json::json!("beta.search")));
}

#[tokio::test]
async fn explicit_provider_prefix_resolves_without_ambiguity() {
    let registry = Arc::new(ServiceRegistry::new());
    let plugins = Arc::new(PluginManager::new(Arc::clone(&registry)));
    registry.register("alpha", "http://alpha", ProviderOrigin::Discovered, 1, CircuitBreakerConfig::default(), vec![tool_descriptor("search")]);
    registry.register("beta", "http://beta", ProviderOrigin::Discovered, 1, CircuitBreakerConfig::default(), vec![tool_descriptor("search")]);

    let balancer = LoadBalancer::new(Strategy::RoundRobin);
    let router = Router::new(registry, balancer, plugins, RouterConfig::default());
    let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"alpha.search","arguments":{}}}"#;

    // alpha is unreachable in this test, but resolution must pick exactly
    // one candidate (not -32602) before attempting dispatch.
    let reply = router.handle(body, &InboundHeaders::default()).await.unwrap();
    assert_ne!(reply["error"]["code"], serde_json::json!(-32602));
}

#[tokio::test]
async fn open_circuit_rejects_dispatch_without_touching_transport() {
    let registry = Arc::new(ServiceRegistry::new());
    let plugins = Arc::new(PluginManager::new(Arc::clone(&registry)));
    let breaker_config = CircuitBreakerConfig {
        failure_threshold: 1,
        reset_timeout: Duration::from_secs(60),
        half_open_max_requests: 1,
    };
    let record = registry.register(
        "flaky",
        "http://127.0.0.1:1",
        ProviderOrigin::Discovered,
        1,
        breaker_config,
        vec![tool_descriptor("ping_tool")],
    );
    record.circuit.record_failure();
    assert_eq!(record.circuit.state(), mcp_gateway::circuit::CircuitState::Open);

    let balancer = LoadBalancer::new(Strategy::RoundRobin);
    let router = Router::new(registry, balancer, plugins, RouterConfig::default());
    let body = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"ping_tool","arguments":{}}}"#;

    let reply = router.handle(body, &InboundHeaders::default()).await.unwrap();
    assert_eq!(reply["error"]["code"], -32000);
}
