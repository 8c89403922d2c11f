//! MCP capability descriptor wire types (tools, resources, prompts).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition as advertised to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name, addressed by clients as `<provider>.<name>`.
    pub name: String,
    /// Human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tool description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Output JSON Schema.
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Resource definition as advertised to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URI.
    pub uri: String,
    /// Resource name.
    pub name: String,
    /// Resource description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Prompt definition as advertised to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name.
    pub name: String,
    /// Prompt description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Prompt arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// A single named argument a prompt accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Argument description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument is required.
    #[serde(default)]
    pub required: bool,
}

/// Content item returned by a tool call or a rendered prompt message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Plain text content.
    #[serde(rename = "text")]
    Text {
        /// Text value.
        text: String,
    },
    /// Base64-encoded image content.
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded data.
        data: String,
        /// MIME type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource contents.
    #[serde(rename = "resource")]
    Resource {
        /// Resource contents.
        resource: ResourceContents,
    },
}

/// Contents of a resource, as returned from `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    /// Text resource.
    Text {
        /// Resource URI.
        uri: String,
        /// MIME type.
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Text content.
        text: String,
    },
    /// Binary resource.
    Blob {
        /// Resource URI.
        uri: String,
        /// MIME type.
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Base64-encoded blob data.
        blob: String,
    },
}

/// Client or server name/version identity block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    /// Name.
    pub name: String,
    /// Version.
    pub version: String,
}

/// Server capability flags advertised in the `initialize` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tools capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    /// Resources capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Prompts capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
}

/// Tools capability flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    /// Whether the server emits `notifications/tools/list_changed`.
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// Resources capability flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesCapability {
    /// Whether `resources/subscribe` is supported.
    #[serde(default)]
    pub subscribe: bool,
    /// Whether the server emits `notifications/resources/list_changed`.
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// Prompts capability flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsCapability {
    /// Whether the server emits `notifications/prompts/list_changed`.
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// Client capability flags received in the `initialize` request.
///
/// The gateway does not act on any of these beyond round-tripping them
/// through logs; `experimental` is kept opaque so an unrecognised client
/// capability never fails parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental/vendor-specific capabilities, passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
    /// Roots capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
}

/// Roots capability flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootsCapability {
    /// Whether the client emits `notifications/roots/list_changed`.
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tool_serializes_input_schema_as_camel_case() {
        let tool = Tool {
            name: "memory.store".to_string(),
            title: None,
            description: Some("Store a value".to_string()),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
        };
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["inputSchema"]["type"], "object");
        assert!(json.get("outputSchema").is_none());
    }

    #[test]
    fn content_text_round_trips() {
        let content = Content::Text {
            text: "hello".to_string(),
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], "text");
        let back: Content = serde_json::from_value(json).unwrap();
        match back {
            Content::Text { text } => assert_eq!(text, "hello"),
            _ => panic!("expected text content"),
        }
    }

    #[test]
    fn resource_contents_text_is_untagged() {
        let contents = ResourceContents::Text {
            uri: "memory://dump".to_string(),
            mime_type: Some("application/json".to_string()),
            text: "{}".to_string(),
        };
        let json = serde_json::to_value(&contents).unwrap();
        assert_eq!(json["uri"], "memory://dump");
        assert!(json.get("blob").is_none());
    }

    #[test]
    fn server_capabilities_omit_unset_sections() {
        let caps = ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: true }),
            resources: None,
            prompts: None,
        };
        let json = serde_json::to_value(&caps).unwrap();
        assert!(json.get("resources").is_none());
        assert!(json.get("prompts").is_none());
        assert_eq!(json["tools"]["listChanged"], true);
    }
}
