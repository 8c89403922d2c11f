//! Gateway-wide error type and its JSON-RPC surfacing.
//!
//! Every error kind the core can produce (see the spec's Error Handling
//! Design) has one variant here. [`Error::to_rpc_code`] maps a variant to
//! the JSON-RPC code it must be surfaced as; [`rpc_codes`] names the
//! numeric constants so call sites never spell out a bare literal.

use serde_json::Value;
use thiserror::Error;

/// Result type alias used throughout the gateway.
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound JSON-RPC body failed to parse as JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// Inbound body was valid JSON but not a well-formed JSON-RPC 2.0 request
    /// (missing/wrong `jsonrpc`, empty batch, etc.).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `method` is not in the router's method table, or no provider offers
    /// the requested tool/prompt/resource name.
    #[error("method not found: {name}")]
    MethodNotFound {
        /// The method or tool/prompt name that wasn't found.
        name: String,
        /// Nearby registered names the caller might have meant, if any.
        candidates: Vec<String>,
    },

    /// `params` failed method-specific validation.
    #[error("invalid params: {message}")]
    InvalidParams {
        /// Human-readable validation failure.
        message: String,
        /// Candidate provider addresses, populated for ambiguous bare-name lookups.
        candidates: Vec<String>,
    },

    /// Structural failure inside the gateway unrelated to a specific provider call.
    #[error("internal error: {cause}")]
    Internal {
        /// Underlying cause, surfaced to operators via `data.cause`.
        cause: String,
    },

    /// No instance of the requested capability is admissible: either every
    /// candidate's circuit is open, or none are registered.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Request lacked required authentication.
    #[error("authentication required")]
    AuthRequired,

    /// Request was authenticated but not authorized for the target.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The bounded worker pool is saturated.
    #[error("rate limited")]
    RateLimited,

    /// A provider call or registry operation exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The client disconnected or cancelled before a reply was produced.
    #[error("cancelled by client")]
    Cancelled,

    /// A provider record failed descriptor validation at registration time.
    #[error("invalid provider record: {0}")]
    InvalidRecord(String),

    /// An external provider returned a well-formed JSON-RPC `{code,message,data}`
    /// error of its own; passed through unchanged per §4.8 step 6 rather than
    /// re-wrapped as a gateway-side failure.
    #[error("provider error {code}: {message}")]
    ProviderError {
        /// The provider's own JSON-RPC error code.
        code: i32,
        /// The provider's own message.
        message: String,
        /// The provider's own `data`, if any.
        data: Option<Value>,
    },

    /// An external provider's `/health` (or registration-time reachability) probe failed.
    #[error("endpoint unreachable: {0}")]
    EndpointUnreachable(String),

    /// Configuration failed to load or did not pass validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A transport-level failure talking to an external provider (connection
    /// refused, DNS failure, TLS failure, etc.) — counts as a circuit-breaker failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// IO failure (plugin file persistence, git child process, editor plugin).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure outside the top-level parse step.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP client failure talking to an external provider or discovery source.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Map this error to the JSON-RPC error code it must be surfaced as.
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Parse(_) => rpc_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => rpc_codes::INVALID_REQUEST,
            Self::MethodNotFound { .. } => rpc_codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => rpc_codes::INVALID_PARAMS,
            Self::ProviderUnavailable(_) => rpc_codes::PROVIDER_UNAVAILABLE,
            Self::AuthRequired => rpc_codes::AUTH_REQUIRED,
            Self::AccessDenied(_) => rpc_codes::ACCESS_DENIED,
            Self::RateLimited => rpc_codes::RATE_LIMITED,
            Self::Timeout(_) => rpc_codes::TIMEOUT,
            Self::Cancelled => rpc_codes::CANCELLED,
            Self::ProviderError { code, .. } => *code,
            Self::InvalidRecord(_)
            | Self::EndpointUnreachable(_)
            | Self::Config(_)
            | Self::Transport(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Http(_)
            | Self::Internal { .. } => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Whether this error counts as a circuit-breaker failure per §4.3: a
    /// transport/system error, or a server-fault-range JSON-RPC code.
    /// Application errors (`-32602`/`-32601`) do not count.
    #[must_use]
    pub fn counts_as_circuit_failure(&self) -> bool {
        let code = self.to_rpc_code();
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Io(_) | Self::Http(_) | Self::Internal { .. }
        ) || (rpc_codes::SERVER_ERROR_END..=rpc_codes::SERVER_ERROR_START).contains(&code)
            || code == rpc_codes::INTERNAL_ERROR
    }

    /// Construct an [`Error::Internal`] from any displayable cause.
    pub fn internal(cause: impl Into<String>) -> Self {
        Self::Internal { cause: cause.into() }
    }

    /// Construct an [`Error::MethodNotFound`] with no suggestions.
    pub fn method_not_found(name: impl Into<String>) -> Self {
        Self::MethodNotFound { name: name.into(), candidates: Vec::new() }
    }

    /// Construct an [`Error::MethodNotFound`] carrying nearby-name suggestions.
    pub fn method_not_found_with_candidates(name: impl Into<String>, candidates: Vec<String>) -> Self {
        Self::MethodNotFound { name: name.into(), candidates }
    }

    /// Construct an [`Error::InvalidParams`] with no candidate list.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            candidates: Vec::new(),
        }
    }

    /// Construct an ambiguous-bare-name [`Error::InvalidParams`] with candidates.
    pub fn ambiguous_name(name: &str, candidates: Vec<String>) -> Self {
        Self::InvalidParams {
            message: format!("{name} is ambiguous across multiple providers"),
            candidates,
        }
    }
}

/// Named JSON-RPC error code constants, including this gateway's custom
/// server-fault-range codes.
pub mod rpc_codes {
    /// Parse error — invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request — the JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Start of the reserved server-error range (inclusive, descending).
    pub const SERVER_ERROR_START: i32 = -32000;
    /// End of the reserved server-error range (inclusive, descending).
    pub const SERVER_ERROR_END: i32 = -32099;
    /// Circuit open / no healthy provider instance available.
    pub const PROVIDER_UNAVAILABLE: i32 = -32000;
    /// Request requires authentication that was not supplied.
    pub const AUTH_REQUIRED: i32 = -32001;
    /// Request was authenticated but is not authorized.
    pub const ACCESS_DENIED: i32 = -32002;
    /// Request was rejected due to rate limiting / worker-pool saturation.
    pub const RATE_LIMITED: i32 = -32003;
    /// Request or provider call exceeded its deadline.
    pub const TIMEOUT: i32 = -32004;
    /// Request was cancelled by the client before completion.
    pub const CANCELLED: i32 = -32800;
}
