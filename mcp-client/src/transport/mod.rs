mod http;
mod sse;
mod stdio;

pub use http::HttpConnection;
pub use http::HttpTarget;
pub use sse::SseConnection;
pub use sse::SseTarget;
pub use stdio::StdioConnection;
pub use stdio::StdioTarget;

use std::time::Duration;

use async_trait::async_trait;

/// Liveness/lifecycle state of one downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// The contract every transport variant implements. The connection pool
/// only ever talks to this trait; it never matches on which transport kind
/// is underneath.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establishes the transport and performs the MCP `initialize`
    /// handshake.
    async fn connect(&self) -> Result<(), hypertool_error::ProxyError>;

    /// Sends one JSON-RPC request and awaits its matched response.
    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, hypertool_error::ProxyError>;

    /// Graceful shutdown.
    async fn close(&self);

    /// Cheap liveness check used by the pool's health loop.
    async fn is_healthy(&self) -> bool;

    fn state(&self) -> ConnectionState;
}

/// A tagged union over the three transport variants, implementing
/// [`Connection`] by delegation. Kept as a concrete enum (rather than
/// `Box<dyn Connection>`) so the pool can match on the underlying kind for
/// diagnostics without downcasting.
pub enum Transport {
    Stdio(StdioConnection),
    Http(HttpConnection),
    Sse(SseConnection),
}

#[async_trait]
impl Connection for Transport {
    async fn connect(&self) -> Result<(), hypertool_error::ProxyError> {
        match self {
            Transport::Stdio(c) => c.connect().await,
            Transport::Http(c) => c.connect().await,
            Transport::Sse(c) => c.connect().await,
        }
    }

    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, hypertool_error::ProxyError> {
        match self {
            Transport::Stdio(c) => c.call(method, params, timeout).await,
            Transport::Http(c) => c.call(method, params, timeout).await,
            Transport::Sse(c) => c.call(method, params, timeout).await,
        }
    }

    async fn close(&self) {
        match self {
            Transport::Stdio(c) => c.close().await,
            Transport::Http(c) => c.close().await,
            Transport::Sse(c) => c.close().await,
        }
    }

    async fn is_healthy(&self) -> bool {
        match self {
            Transport::Stdio(c) => c.is_healthy().await,
            Transport::Http(c) => c.is_healthy().await,
            Transport::Sse(c) => c.is_healthy().await,
        }
    }

    fn state(&self) -> ConnectionState {
        match self {
            Transport::Stdio(c) => c.state(),
            Transport::Http(c) => c.state(),
            Transport::Sse(c) => c.state(),
        }
    }
}
