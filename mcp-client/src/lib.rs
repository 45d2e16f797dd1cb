//! Downstream MCP transports and the client that multiplexes JSON-RPC calls
//! over them. The proxy is a *client* of each configured downstream server;
//! this crate owns exactly one bidirectional transport per server and
//! matches responses to requests by JSON-RPC id.

mod client;
mod pending;
pub mod transport;

pub use client::McpClient;
pub use transport::Connection;
pub use transport::ConnectionState;
pub use transport::HttpTarget;
pub use transport::SseTarget;
pub use transport::StdioTarget;
pub use transport::Transport;
