use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hypertool_error::ProxyError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPC_VERSION;
use reqwest_eventsource::Event;
use reqwest_eventsource::EventSource;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::error;

use super::Connection;
use super::ConnectionState;
use crate::pending::PendingRequests;

/// Target for the legacy SSE transport: an event stream to read from and a
/// companion endpoint to POST requests to.
#[derive(Debug, Clone)]
pub struct SseTarget {
    pub sse_url: String,
    pub post_url: String,
    pub headers: HashMap<String, String>,
}

pub struct SseConnection {
    target: SseTarget,
    client: reqwest::Client,
    pending: Arc<PendingRequests>,
    connected: AtomicBool,
}

impl SseConnection {
    pub fn new(target: SseTarget) -> Self {
        Self {
            target,
            client: reqwest::Client::new(),
            pending: Arc::new(PendingRequests::new()),
            connected: AtomicBool::new(false),
        }
    }

    fn spawn_reader(&self) -> Result<(), ProxyError> {
        let mut request = self.client.get(&self.target.sse_url);
        for (name, value) in &self.target.headers {
            request = request.header(name, value);
        }

        let mut source = EventSource::new(request)
            .map_err(|e| ProxyError::connection(format!("failed to open SSE stream: {e}")))?;

        let pending = self.pending.clone();
        tokio::spawn(async move {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => debug!("SSE stream opened"),
                    Ok(Event::Message(message)) => {
                        if message.data.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JSONRPCMessage>(&message.data) {
                            Ok(JSONRPCMessage::Response(resp)) => {
                                pending.resolve(resp.id, Ok(resp.result)).await;
                            }
                            Ok(JSONRPCMessage::Error(err)) => {
                                pending.resolve(err.id, Err(err.error)).await;
                            }
                            Ok(_) => debug!("ignoring non-response SSE message"),
                            Err(e) => error!("failed to parse SSE event payload: {e}"),
                        }
                    }
                    Err(e) => {
                        error!("SSE stream error: {e}");
                        source.close();
                        break;
                    }
                }
            }
            pending
                .fail_all(mcp_types::JSONRPCErrorError {
                    code: mcp_types::error_codes::INTERNAL_ERROR,
                    message: "SSE transport closed".to_string(),
                    data: None,
                })
                .await;
        });

        Ok(())
    }
}

#[async_trait]
impl Connection for SseConnection {
    async fn connect(&self) -> Result<(), ProxyError> {
        self.spawn_reader()?;
        let init_params = serde_json::json!({
            "protocolVersion": mcp_types::MCP_SCHEMA_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "hypertool-mcp-proxy", "version": env!("CARGO_PKG_VERSION") },
        });
        self.call("initialize", Some(init_params), Duration::from_secs(10))
            .await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ProxyError> {
        let id = self.pending.next_request_id();
        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        let rx = self.pending.register(id).await;

        let mut post = self.client.post(&self.target.post_url);
        for (name, value) in &self.target.headers {
            post = post.header(name, value);
        }
        post.json(&request)
            .send()
            .await
            .map_err(|e| ProxyError::connection(format!("SSE companion POST failed: {e}")))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(ProxyError::connection(err.message)),
            Ok(Err(_)) => Err(ProxyError::connection("SSE transport closed mid-call")),
            Err(_) => Err(ProxyError::Timeout(timeout)),
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_healthy(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_carries_distinct_stream_and_post_urls() {
        let target = SseTarget {
            sse_url: "http://localhost/events".to_string(),
            post_url: "http://localhost/messages".to_string(),
            headers: HashMap::new(),
        };
        assert_ne!(target.sse_url, target.post_url);
    }
}
