use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use hypertool_error::ProxyError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCRequest;
use mcp_types::RequestId;
use mcp_types::JSONRPC_VERSION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use tokio::sync::Mutex;
use tracing::warn;

use super::Connection;
use super::ConnectionState;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Target for the streamable-HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    pub url: String,
    pub headers: HashMap<String, String>,
}

pub struct HttpConnection {
    target: HttpTarget,
    client: reqwest::Client,
    next_id: AtomicI64,
    session_id: Mutex<Option<String>>,
    session_expired: std::sync::atomic::AtomicBool,
}

impl HttpConnection {
    pub fn new(target: HttpTarget) -> Self {
        Self {
            target,
            client: reqwest::Client::new(),
            next_id: AtomicI64::new(0),
            session_id: Mutex::new(None),
            session_expired: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn build_headers(&self, session_id: Option<&str>) -> Result<HeaderMap, ProxyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        for (name, value) in &self.target.headers {
            let header_name = HeaderName::try_from(name.as_str())
                .map_err(|e| ProxyError::Configuration(format!("invalid header '{name}': {e}")))?;
            let header_value = HeaderValue::try_from(value.as_str())
                .map_err(|e| ProxyError::Configuration(format!("invalid header value: {e}")))?;
            headers.insert(header_name, header_value);
        }
        if let Some(sid) = session_id {
            let value = HeaderValue::try_from(sid)
                .map_err(|e| ProxyError::Internal(format!("invalid session id: {e}")))?;
            headers.insert(HeaderName::from_static("mcp-session-id"), value);
        }
        Ok(headers)
    }

    async fn post(
        &self,
        request: &JSONRPCRequest,
        timeout: Duration,
    ) -> Result<(reqwest::Response, Option<String>), ProxyError> {
        let session_id = self.session_id.lock().await.clone();
        let headers = self.build_headers(session_id.as_deref())?;

        let response = self
            .client
            .post(&self.target.url)
            .headers(headers)
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProxyError::Timeout(timeout)
                } else {
                    ProxyError::connection(format!("http request failed: {e}"))
                }
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::GONE
        {
            self.session_expired.store(true, Ordering::SeqCst);
            return Err(ProxyError::ServerUnavailable {
                server: self.target.url.clone(),
                reason: "session expired".to_string(),
            });
        }

        let new_session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Ok((response, new_session))
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn connect(&self) -> Result<(), ProxyError> {
        let id = RequestId::Integer(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: "initialize".to_string(),
            params: Some(serde_json::json!({
                "protocolVersion": mcp_types::MCP_SCHEMA_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "hypertool-mcp-proxy", "version": env!("CARGO_PKG_VERSION") },
            })),
        };

        let (response, session_id) = self.post(&request, Duration::from_secs(10)).await?;
        if !response.status().is_success() {
            return Err(ProxyError::connection_fatal(format!(
                "initialize failed with status {}",
                response.status()
            )));
        }
        if let Some(sid) = session_id {
            *self.session_id.lock().await = Some(sid);
        }
        self.session_expired.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ProxyError> {
        let id = RequestId::Integer(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        let (response, session_id) = self.post(&request, timeout).await?;
        if let Some(sid) = session_id {
            *self.session_id.lock().await = Some(sid);
        }

        if !response.status().is_success() {
            return Err(ProxyError::connection(format!(
                "http status {}",
                response.status()
            )));
        }

        let body: JSONRPCMessage = response
            .json()
            .await
            .map_err(|e| ProxyError::connection(format!("invalid JSON-RPC response body: {e}")))?;

        match body {
            JSONRPCMessage::Response(resp) if resp.id == id => Ok(resp.result),
            JSONRPCMessage::Error(err) if err.id == id => Err(ProxyError::connection(err.error.message)),
            other => {
                warn!("unexpected response shape from streamable-http server: {other:?}");
                Err(ProxyError::Internal(
                    "response id did not match request".to_string(),
                ))
            }
        }
    }

    async fn close(&self) {
        let session_id = self.session_id.lock().await.take();
        if let Some(sid) = session_id {
            if let Ok(headers) = self.build_headers(Some(&sid)) {
                let _ = self
                    .client
                    .delete(&self.target.url)
                    .headers(headers)
                    .send()
                    .await;
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        !self.session_expired.load(Ordering::SeqCst) && self.session_id.lock().await.is_some()
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_headers_rejects_invalid_header_name() {
        let mut headers = HashMap::new();
        headers.insert("bad header\n".to_string(), "v".to_string());
        let target = HttpTarget {
            url: "http://localhost".to_string(),
            headers,
        };
        let conn = HttpConnection::new(target);
        assert!(conn.build_headers(None).is_err());
    }
}
