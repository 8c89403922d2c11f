//! Request context propagation.
//!
//! A [`RequestContext`] is built once per inbound JSON-RPC call (or once per
//! element of a batch) and threaded explicitly through router → registry →
//! load balancer → provider invocation. It carries the identifiers needed to
//! correlate a single logical request across components and logs, plus the
//! deadline that bounds how long the gateway is willing to wait for a reply.
//!
//! A `tokio::task_local!` trace id is layered on top as a logging
//! convenience only (see [`trace`]): components that don't take an explicit
//! `&RequestContext` (background health loops, file watchers) can still tag
//! their spans with the trace id of whatever scope spawned them. It is never
//! a substitute for passing [`RequestContext`] itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default request deadline when neither the client nor the gateway config
/// supplies one.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Per-request identifiers and cancellation/deadline state, threaded
/// explicitly through every component a single JSON-RPC call touches.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identifies this specific JSON-RPC call. Generated if the client sent none.
    pub request_id: String,
    /// Identifies a logical operation that may span multiple JSON-RPC calls
    /// (e.g. a client-side retry). Echoes the client's `X-Correlation-Id` if present.
    pub correlation_id: String,
    /// Identifies the end-to-end trace this request belongs to. Propagated
    /// to outbound provider calls as `X-Trace-Id`.
    pub trace_id: String,
    /// Identifies this hop within the trace.
    pub span_id: String,
    /// Point in time by which a reply must be produced or the call fails
    /// with [`crate::Error::Timeout`].
    pub deadline: Instant,
    /// Caller-supplied identity, if the request carried one.
    pub client_info: Option<ClientInfo>,
    /// Cancelled when the client disconnects or sends `notifications/cancelled`.
    pub cancellation: CancellationToken,
}

/// Caller identity extracted from inbound headers, sanitized for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Masked form of the caller's bearer token or API key, e.g. `"sk-…ab12"`.
    pub masked_credential: Option<String>,
    /// Remote address, if known.
    pub remote_addr: Option<String>,
}

/// Inbound header values relevant to context construction, extracted by the
/// transport layer before a request is handed to the router.
#[derive(Debug, Clone, Default)]
pub struct InboundHeaders {
    /// `Request-Id` or `X-Request-Id`.
    pub request_id: Option<String>,
    /// `Correlation-Id` or `X-Correlation-Id`.
    pub correlation_id: Option<String>,
    /// `Trace-Id` or `X-Trace-Id`.
    pub trace_id: Option<String>,
    /// `Span-Id` or `X-Span-Id`.
    pub span_id: Option<String>,
    /// `X-Timeout`, in milliseconds, as sent by the client.
    pub timeout_ms: Option<u64>,
    /// Raw `Authorization` header value, masked before being stored anywhere.
    pub authorization: Option<String>,
    /// Raw `X-Api-Key` header value, masked before being stored anywhere.
    pub api_key: Option<String>,
    /// Remote peer address as seen by the transport.
    pub remote_addr: Option<String>,
}

impl RequestContext {
    /// Build a context for a new inbound call, generating any identifier the
    /// client did not supply and clamping the requested timeout to `max_deadline`.
    #[must_use]
    pub fn new(headers: &InboundHeaders, max_deadline: Duration) -> Self {
        let request_id = headers.request_id.clone().unwrap_or_else(new_id);
        let correlation_id = headers.correlation_id.clone().unwrap_or_else(|| request_id.clone());
        let trace_id = headers.trace_id.clone().unwrap_or_else(crate::trace::generate);
        let span_id = headers.span_id.clone().unwrap_or_else(new_id);

        let requested = headers.timeout_ms.map(Duration::from_millis).unwrap_or(max_deadline);
        let bounded = requested.min(max_deadline);
        let deadline = Instant::now() + bounded;

        let client_info = if headers.authorization.is_some() || headers.api_key.is_some() || headers.remote_addr.is_some() {
            Some(ClientInfo {
                masked_credential: headers
                    .authorization
                    .as_deref()
                    .or(headers.api_key.as_deref())
                    .map(mask_credential),
                remote_addr: headers.remote_addr.clone(),
            })
        } else {
            None
        };

        Self {
            request_id,
            correlation_id,
            trace_id,
            span_id,
            deadline,
            client_info,
            cancellation: CancellationToken::new(),
        }
    }

    /// Time remaining before [`Self::deadline`], or `Duration::ZERO` if already elapsed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed or the client cancelled this call.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero() || self.cancellation.is_cancelled()
    }

    /// Derive a child context for a sub-call (e.g. one fan-out leg of a
    /// batch), sharing identifiers but minting a new span id.
    #[must_use]
    pub fn child_span(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            correlation_id: self.correlation_id.clone(),
            trace_id: self.trace_id.clone(),
            span_id: new_id(),
            deadline: self.deadline,
            client_info: self.client_info.clone(),
            cancellation: self.cancellation.clone(),
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Mask a bearer token / API key for safe logging: keep a short prefix and
/// the last 4 characters, replace the rest with `…`.
///
/// `"Bearer sk-ant-abcdef0123456789"` → `"Bear…6789"`.
#[must_use]
pub fn mask_credential(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}…{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> InboundHeaders {
        InboundHeaders::default()
    }

    #[test]
    fn new_context_generates_all_identifiers_when_absent() {
        let ctx = RequestContext::new(&headers(), DEFAULT_DEADLINE);
        assert!(!ctx.request_id.is_empty());
        assert!(!ctx.span_id.is_empty());
        assert!(ctx.trace_id.starts_with("gw-"));
        assert_eq!(ctx.correlation_id, ctx.request_id);
    }

    #[test]
    fn new_context_echoes_client_supplied_identifiers() {
        let h = InboundHeaders {
            request_id: Some("req-123".into()),
            correlation_id: Some("corr-456".into()),
            trace_id: Some("gw-custom".into()),
            ..headers()
        };
        let ctx = RequestContext::new(&h, DEFAULT_DEADLINE);
        assert_eq!(ctx.request_id, "req-123");
        assert_eq!(ctx.correlation_id, "corr-456");
        assert_eq!(ctx.trace_id, "gw-custom");
    }

    #[test]
    fn client_timeout_is_clamped_to_max_deadline() {
        let h = InboundHeaders {
            timeout_ms: Some(60_000),
            ..headers()
        };
        let ctx = RequestContext::new(&h, Duration::from_secs(5));
        assert!(ctx.remaining() <= Duration::from_secs(5));
    }

    #[test]
    fn client_timeout_under_max_is_honored() {
        let h = InboundHeaders {
            timeout_ms: Some(1_000),
            ..headers()
        };
        let ctx = RequestContext::new(&h, Duration::from_secs(30));
        assert!(ctx.remaining() <= Duration::from_secs(1));
    }

    #[test]
    fn cancellation_marks_context_expired() {
        let ctx = RequestContext::new(&headers(), DEFAULT_DEADLINE);
        assert!(!ctx.is_expired());
        ctx.cancellation.cancel();
        assert!(ctx.is_expired());
    }

    #[test]
    fn child_span_shares_trace_but_mints_new_span_id() {
        let ctx = RequestContext::new(&headers(), DEFAULT_DEADLINE);
        let child = ctx.child_span();
        assert_eq!(child.trace_id, ctx.trace_id);
        assert_eq!(child.request_id, ctx.request_id);
        assert_ne!(child.span_id, ctx.span_id);
    }

    #[test]
    fn mask_credential_keeps_prefix_and_suffix_only() {
        let masked = mask_credential("Bearer sk-ant-abcdef0123456789");
        assert_eq!(masked, "Bear…6789");
        assert!(!masked.contains("abcdef"));
    }

    #[test]
    fn mask_credential_handles_short_strings() {
        assert_eq!(mask_credential("abc"), "****");
    }

    #[test]
    fn client_info_is_none_without_any_header() {
        let ctx = RequestContext::new(&headers(), DEFAULT_DEADLINE);
        assert!(ctx.client_info.is_none());
    }

    #[test]
    fn client_info_present_when_credential_supplied() {
        let h = InboundHeaders {
            authorization: Some("Bearer sk-ant-abcdef0123456789".into()),
            remote_addr: Some("10.0.0.1".into()),
            ..headers()
        };
        let ctx = RequestContext::new(&h, DEFAULT_DEADLINE);
        let info = ctx.client_info.unwrap();
        assert_eq!(info.masked_credential.unwrap(), "Bear…6789");
        assert_eq!(info.remote_addr.unwrap(), "10.0.0.1");
    }
}
