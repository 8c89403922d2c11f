//! MCP protocol wire types: JSON-RPC envelope plus tool/resource/prompt shapes.

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// MCP protocol version this gateway advertises in `initialize` responses.
pub const PROTOCOL_VERSION: &str = "2025-03-26";
