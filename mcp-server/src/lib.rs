//! Upstream MCP endpoint: exposes a composed [`hypertool_core::ProxyRuntime`]
//! to MCP clients over stdio or HTTP. Transport selection and process
//! wiring live in the `cli` crate; this crate only answers JSON-RPC once
//! a runtime exists.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod http;
mod message_processor;
mod notifications;
mod shutdown;
mod stdio;

use std::net::SocketAddr;
use std::sync::Arc;

use hypertool_core::ProxyRuntime;

pub use message_processor::MessageProcessor;

/// Runs the upstream server on stdio until shutdown.
pub async fn run_stdio(runtime: Arc<ProxyRuntime>) -> anyhow::Result<()> {
    let background = runtime.spawn_background_tasks();
    let result = stdio::serve(runtime).await;
    for handle in background {
        handle.abort();
    }
    result
}

/// Runs the upstream server on HTTP, bound to `addr`, until shutdown.
pub async fn run_http(runtime: Arc<ProxyRuntime>, addr: SocketAddr) -> anyhow::Result<()> {
    let background = runtime.spawn_background_tasks();
    let result = http::serve(runtime, addr).await;
    for handle in background {
        handle.abort();
    }
    result
}
