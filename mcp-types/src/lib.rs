//! Wire types for JSON-RPC 2.0 framing and the subset of the Model Context
//! Protocol (MCP) that the proxy speaks on both its upstream and downstream
//! sides: `initialize`, `tools/list`, `tools/call`, and
//! `notifications/tools/list_changed`.
//!
//! These types are shared between `mcp-client` (downstream, we are the
//! client) and `mcp-server` (upstream, we are the server) so that framing
//! and (de)serialization stay in one place.

mod jsonrpc;
mod protocol;

pub use jsonrpc::*;
pub use protocol::*;

/// JSON-RPC protocol version this crate implements.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP schema version the proxy presents in its own `initialize` response.
pub const MCP_SCHEMA_VERSION: &str = "2025-03-26";
