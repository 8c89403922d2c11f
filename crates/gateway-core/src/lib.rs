//! Capability descriptors and method-routing primitives for the MCP gateway.
//!
//! This crate holds the pure data model shared by the gateway binary: the
//! three capability kinds MCP exposes, the descriptor type that advertises
//! them, and the method-name parsing that turns a JSON-RPC method string
//! into a `(kind, target)` routing decision. None of it touches I/O, so it
//! can be exercised without an async runtime.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three capability kinds MCP exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// An executable function.
    Tool,
    /// A readable, URI-addressed datum.
    Resource,
    /// A parameterised prompt template.
    Prompt,
}

impl CapabilityKind {
    /// Short lowercase name, as used in method prefixes (`tools/`, `resources/`, `prompts/`).
    #[must_use]
    pub fn as_plural_str(self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Resource => "resources",
            Self::Prompt => "prompts",
        }
    }
}

/// An immutable descriptor for a single tool, resource, or prompt offered by a provider.
///
/// Descriptors are content-addressed by `name` within a provider; the
/// globally unique address for a tool is `<provider>.<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Name, unique within the owning provider.
    pub name: String,
    /// Which of the three capability kinds this is.
    pub kind: CapabilityKind,
    /// JSON Schema describing the expected input (tool arguments / prompt arguments).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Free-form hint about the shape of a successful result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hint: Option<Value>,
    /// Semver version string of the descriptor itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Free-form tags for search/filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Errors produced while validating a [`CapabilityDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// `name` was empty.
    #[error("capability descriptor name must not be empty")]
    EmptyName,
    /// `name` contained a character outside `[a-z0-9_/-]`.
    #[error("capability descriptor name {0:?} must be lowercase ASCII plus '_', '-', '/'")]
    InvalidNameChars(String),
    /// `input_schema` was present but was not a JSON object (the minimal shape
    /// a JSON Schema metamodel document must have).
    #[error("capability descriptor {0:?} input_schema must be a JSON object")]
    SchemaNotObject(String),
}

fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' || c == '/'
}

/// Validate a descriptor's invariants: non-empty, lowercase-ASCII-plus-`_-/` name,
/// and (if present) an object-shaped `input_schema`.
///
/// # Errors
/// Returns [`DescriptorError`] describing the first invariant violated.
pub fn validate_descriptor(d: &CapabilityDescriptor) -> Result<(), DescriptorError> {
    if d.name.is_empty() {
        return Err(DescriptorError::EmptyName);
    }
    if !d.name.chars().all(is_valid_name_char) {
        return Err(DescriptorError::InvalidNameChars(d.name.clone()));
    }
    if let Some(schema) = &d.input_schema {
        if !schema.is_object() {
            return Err(DescriptorError::SchemaNotObject(d.name.clone()));
        }
    }
    Ok(())
}

/// Compare two descriptors ignoring `description` and `tags`, which are
/// presentational and do not change routing or invocation semantics.
#[must_use]
pub fn descriptor_equals_semantic(a: &CapabilityDescriptor, b: &CapabilityDescriptor) -> bool {
    a.name == b.name
        && a.kind == b.kind
        && a.input_schema == b.input_schema
        && a.output_hint == b.output_hint
        && a.version == b.version
}

/// The capability kind and target name a JSON-RPC method resolves to, or
/// `None` for methods that aren't dispatched against a capability (e.g.
/// `initialize`, `ping`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodTarget {
    /// The capability kind this method addresses.
    pub kind: CapabilityKind,
    /// `list`, `read`, `call`, `get`, or `subscribe` — the operation on that kind.
    pub operation: MethodOperation,
}

/// The operation a method performs against a capability kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOperation {
    /// `*/list` — enumerate all descriptors of this kind.
    List,
    /// `tools/call` — invoke a tool.
    Call,
    /// `resources/read` — read a resource by URI.
    Read,
    /// `resources/subscribe` — subscribe to resource change notifications.
    Subscribe,
    /// `prompts/get` — render a prompt.
    Get,
}

/// Methods handled directly by the router, not dispatched to a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMethod {
    /// `initialize` — server handshake.
    Initialize,
    /// `ping` — health reply.
    Ping,
}

/// The result of classifying a JSON-RPC method name.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchedMethod {
    /// A control-plane method handled by the router itself.
    Control(ControlMethod),
    /// A capability-dispatched method.
    Capability(MethodTarget),
    /// Not a method this gateway recognises.
    Unknown,
}

/// Classify a JSON-RPC method name into a dispatch target.
///
/// This performs no validation of `params` — that happens per §4.8 step 3,
/// after the method has been classified, using the method-specific
/// validator. Routing decisions must never be made on unvalidated `params`
/// fields; this function only looks at `method`.
#[must_use]
pub fn match_method(method: &str) -> MatchedMethod {
    match method {
        "initialize" => MatchedMethod::Control(ControlMethod::Initialize),
        "ping" => MatchedMethod::Control(ControlMethod::Ping),
        "tools/list" => MatchedMethod::Capability(MethodTarget {
            kind: CapabilityKind::Tool,
            operation: MethodOperation::List,
        }),
        "tools/call" => MatchedMethod::Capability(MethodTarget {
            kind: CapabilityKind::Tool,
            operation: MethodOperation::Call,
        }),
        "resources/list" => MatchedMethod::Capability(MethodTarget {
            kind: CapabilityKind::Resource,
            operation: MethodOperation::List,
        }),
        "resources/read" => MatchedMethod::Capability(MethodTarget {
            kind: CapabilityKind::Resource,
            operation: MethodOperation::Read,
        }),
        "resources/subscribe" => MatchedMethod::Capability(MethodTarget {
            kind: CapabilityKind::Resource,
            operation: MethodOperation::Subscribe,
        }),
        "prompts/list" => MatchedMethod::Capability(MethodTarget {
            kind: CapabilityKind::Prompt,
            operation: MethodOperation::List,
        }),
        "prompts/get" => MatchedMethod::Capability(MethodTarget {
            kind: CapabilityKind::Prompt,
            operation: MethodOperation::Get,
        }),
        _ => MatchedMethod::Unknown,
    }
}

/// Split a `tools/call`-style addressed name into `(provider, bare_name)` if
/// it contains the `<provider>.<name>` separator, otherwise return `None`
/// to signal the caller must resolve it by unique-provider-offering lookup.
#[must_use]
pub fn split_provider_address(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: name.to_string(),
            kind: CapabilityKind::Tool,
            input_schema: Some(serde_json::json!({"type": "object"})),
            output_hint: None,
            version: Some("1.0.0".to_string()),
            tags: vec![],
            description: None,
        }
    }

    #[test]
    fn validate_descriptor_accepts_well_formed_name() {
        assert!(validate_descriptor(&tool("memory_store")).is_ok());
        assert!(validate_descriptor(&tool("git/status")).is_ok());
        assert!(validate_descriptor(&tool("a-b_c")).is_ok());
    }

    #[test]
    fn validate_descriptor_rejects_empty_name() {
        assert_eq!(validate_descriptor(&tool("")), Err(DescriptorError::EmptyName));
    }

    #[test]
    fn validate_descriptor_rejects_uppercase_or_symbols() {
        assert!(matches!(
            validate_descriptor(&tool("Memory_Store")),
            Err(DescriptorError::InvalidNameChars(_))
        ));
        assert!(matches!(
            validate_descriptor(&tool("memory store")),
            Err(DescriptorError::InvalidNameChars(_))
        ));
    }

    #[test]
    fn validate_descriptor_rejects_non_object_schema() {
        let mut d = tool("memory_store");
        d.input_schema = Some(serde_json::json!("not-an-object"));
        assert!(matches!(
            validate_descriptor(&d),
            Err(DescriptorError::SchemaNotObject(_))
        ));
    }

    #[test]
    fn descriptor_equals_semantic_ignores_description_and_tags() {
        let mut a = tool("memory_store");
        let mut b = tool("memory_store");
        a.description = Some("store a value".to_string());
        b.description = Some("completely different text".to_string());
        a.tags = vec!["kv".to_string()];
        b.tags = vec![];
        assert!(descriptor_equals_semantic(&a, &b));
    }

    #[test]
    fn descriptor_equals_semantic_detects_schema_change() {
        let a = tool("memory_store");
        let mut b = tool("memory_store");
        b.input_schema = Some(serde_json::json!({"type": "string"}));
        assert!(!descriptor_equals_semantic(&a, &b));
    }

    #[test]
    fn match_method_classifies_control_methods() {
        assert_eq!(
            match_method("initialize"),
            MatchedMethod::Control(ControlMethod::Initialize)
        );
        assert_eq!(match_method("ping"), MatchedMethod::Control(ControlMethod::Ping));
    }

    #[test]
    fn match_method_classifies_capability_methods() {
        assert_eq!(
            match_method("tools/call"),
            MatchedMethod::Capability(MethodTarget {
                kind: CapabilityKind::Tool,
                operation: MethodOperation::Call,
            })
        );
        assert_eq!(
            match_method("resources/subscribe"),
            MatchedMethod::Capability(MethodTarget {
                kind: CapabilityKind::Resource,
                operation: MethodOperation::Subscribe,
            })
        );
    }

    #[test]
    fn match_method_rejects_unknown_method() {
        assert_eq!(match_method("tools/destroy"), MatchedMethod::Unknown);
    }

    #[test]
    fn split_provider_address_splits_on_first_dot() {
        assert_eq!(split_provider_address("memory.store"), Some(("memory", "store")));
        assert_eq!(split_provider_address("store"), None);
    }
}
