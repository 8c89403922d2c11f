//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// MCP gateway: routes Model Context Protocol traffic across discovered and
/// built-in providers.
#[derive(Parser, Debug)]
#[command(name = "mcp-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Disable service discovery, serving only statically configured and
    /// built-in providers.
    #[arg(long)]
    pub no_discovery: bool,
}
