//! JSON-RPC 2.0 envelope and MCP method param/result shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::{ClientCapabilities, Content, Info, Prompt, Resource, ResourceContents, ServerCapabilities, Tool};

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version, always `"2.0"`.
    pub jsonrpc: String,
    /// Request id. Absent for notifications (see [`JsonRpcNotification`]).
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters, kept opaque until method-specific validation runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 notification (no `id`, no reply expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version, always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response: exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version, always `"2.0"`.
    pub jsonrpc: String,
    /// Echoes the request id; `null` only for parse/invalid-request failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Build a success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response with no `data`.
    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self::error_with_data_opt(id, code, message, None)
    }

    /// Build an error response carrying a `data` payload.
    pub fn error_with_data(id: Option<RequestId>, code: i32, message: impl Into<String>, data: Value) -> Self {
        Self::error_with_data_opt(id, code, message, Some(data))
    }

    fn error_with_data_opt(id: Option<RequestId>, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Short human-readable message.
    pub message: String,
    /// Optional structured detail (`data.cause`, `data.candidates`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC request id: string or number, per the spec's `id (string|number|null)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String id.
    String(String),
    /// Numeric id.
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A single element of an inbound JSON-RPC body: either a request (has `id`)
/// or a notification (no `id`). Batches are `Vec<JsonRpcInbound>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcInbound {
    /// Has an `id`; expects a matching reply.
    Request(JsonRpcRequest),
    /// No `id`; produces no reply.
    Notification(JsonRpcNotification),
}

impl JsonRpcInbound {
    /// The method name, common to both variants.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(r) => &r.method,
            Self::Notification(n) => &n.method,
        }
    }

    /// The opaque params value, common to both variants.
    #[must_use]
    pub fn params(&self) -> Option<&Value> {
        match self {
            Self::Request(r) => r.params.as_ref(),
            Self::Notification(n) => n.params.as_ref(),
        }
    }

    /// The request id, or `None` for a notification.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Notification(_) => None,
        }
    }
}

// ---------------------------------------------------------------------
// initialize
// ---------------------------------------------------------------------

/// `initialize` request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version the client supports.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capability flags.
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client identity.
    #[serde(rename = "clientInfo")]
    pub client_info: Info,
}

/// `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version this gateway implements.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capability flags.
    pub capabilities: ServerCapabilities,
    /// Server identity.
    #[serde(rename = "serverInfo")]
    pub server_info: Info,
}

// ---------------------------------------------------------------------
// tools
// ---------------------------------------------------------------------

/// `tools/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    /// Aggregated tool descriptors.
    pub tools: Vec<Tool>,
}

/// `tools/call` request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    /// Tool name, bare or `<provider>.<name>`-addressed.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallResult {
    /// Content items returned by the tool.
    pub content: Vec<Content>,
    /// Whether this result represents a tool-level error.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

// ---------------------------------------------------------------------
// resources
// ---------------------------------------------------------------------

/// `resources/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesListResult {
    /// Aggregated resource descriptors.
    pub resources: Vec<Resource>,
}

/// `resources/read` request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// `resources/read` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadResult {
    /// Resource contents (one entry per URI requested; always one here).
    pub contents: Vec<ResourceContents>,
}

/// `resources/subscribe` request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesSubscribeParams {
    /// URI of the resource to subscribe to.
    pub uri: String,
}

// ---------------------------------------------------------------------
// prompts
// ---------------------------------------------------------------------

/// `prompts/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsListResult {
    /// Aggregated prompt descriptors.
    pub prompts: Vec<Prompt>,
}

/// `prompts/get` request params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsGetParams {
    /// Prompt name, bare or `<provider>.<name>`-addressed.
    pub name: String,
    /// Prompt arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
}

/// `prompts/get` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsGetResult {
    /// Prompt description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered prompt messages.
    pub messages: Vec<PromptMessage>,
}

/// A single rendered prompt message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message role (`"user"` or `"assistant"`).
    pub role: String,
    /// Message content.
    pub content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn json_rpc_response_success_round_trips() {
        let resp = JsonRpcResponse::success(RequestId::Number(1), json!({"tools": []}));
        assert!(resp.error.is_none());
        assert_eq!(resp.id.unwrap(), RequestId::Number(1));
    }

    #[test]
    fn json_rpc_response_error_carries_code_and_message() {
        let resp = JsonRpcResponse::error(Some(RequestId::String("req-1".into())), -32601, "Method not found");
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
        assert!(err.data.is_none());
    }

    #[test]
    fn json_rpc_response_error_with_data_carries_candidates() {
        let resp = JsonRpcResponse::error_with_data(
            Some(RequestId::Number(2)),
            -32602,
            "ambiguous",
            json!({"candidates": ["memory.store", "cache.store"]}),
        );
        let err = resp.error.unwrap();
        assert_eq!(err.data.unwrap()["candidates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn request_id_display_matches_kind() {
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::String("abc".into()).to_string(), "abc");
    }

    #[test]
    fn jsonrpc_inbound_distinguishes_request_from_notification() {
        let req: JsonRpcInbound = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": "ping"
        }))
        .unwrap();
        assert!(req.id().is_some());

        let notif: JsonRpcInbound = serde_json::from_value(json!({
            "jsonrpc": "2.0", "method": "notifications/cancelled"
        }))
        .unwrap();
        assert!(notif.id().is_none());
        assert_eq!(notif.method(), "notifications/cancelled");
    }

    #[test]
    fn tools_call_params_defaults_arguments_to_null() {
        let params: ToolsCallParams = serde_json::from_value(json!({"name": "memory.store"})).unwrap();
        assert!(params.arguments.is_null());
    }

    #[test]
    fn initialize_result_advertises_protocol_version_and_capabilities() {
        let result = InitializeResult {
            protocol_version: "2025-03-26".to_string(),
            capabilities: ServerCapabilities {
                tools: Some(super::super::ToolsCapability { list_changed: true }),
                resources: Some(super::super::ResourcesCapability {
                    subscribe: true,
                    list_changed: true,
                }),
                prompts: Some(super::super::PromptsCapability { list_changed: true }),
            },
            server_info: Info {
                name: "mcp-gateway".to_string(),
                version: "0.1.0".to_string(),
            },
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["protocolVersion"], "2025-03-26");
        assert_eq!(json["capabilities"]["resources"]["subscribe"], true);
        assert_eq!(json["serverInfo"]["name"], "mcp-gateway");
    }
}
