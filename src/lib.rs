//! MCP Gateway core
//!
//! Routes JSON-RPC 2.0 Model Context Protocol traffic across a dynamic set
//! of providers: built-in in-process plugins and externally discovered
//! services alike. Handles capability aggregation, request context
//! propagation (deadlines, cancellation, tracing), per-provider circuit
//! breaking, load balancing, and hot-reloadable plugin lifecycle.
//!
//! # Protocol Version
//!
//! Advertises MCP protocol version 2025-03-26 in `initialize` responses; see
//! [`protocol::PROTOCOL_VERSION`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod balancer;
pub mod circuit;
pub mod cli;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod plugin;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod trace;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
