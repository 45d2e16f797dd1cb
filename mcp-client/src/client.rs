use std::collections::HashMap;
use std::time::Duration;

use hypertool_error::ProxyError;
use mcp_types::CallToolRequestParams;
use mcp_types::CallToolResult;
use mcp_types::ListToolsRequestParams;
use mcp_types::ListToolsResult;

use crate::transport::Connection;
use crate::transport::HttpTarget;
use crate::transport::SseTarget;
use crate::transport::StdioTarget;
use crate::transport::Transport;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected client to exactly one downstream MCP server, over whichever
/// transport it was constructed with. The connection pool holds one of
/// these per configured server.
pub struct McpClient {
    transport: Transport,
}

impl McpClient {
    pub async fn new_stdio_client(
        command: String,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ProxyError> {
        let transport = Transport::Stdio(crate::transport::StdioConnection::new(StdioTarget {
            command,
            args,
            env: env.unwrap_or_default(),
        }));
        transport.connect().await?;
        Ok(Self { transport })
    }

    pub async fn new_http_client(
        url: String,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Self, ProxyError> {
        let transport = Transport::Http(crate::transport::HttpConnection::new(HttpTarget {
            url,
            headers: headers.unwrap_or_default(),
        }));
        transport.connect().await?;
        Ok(Self { transport })
    }

    pub async fn new_sse_client(
        sse_url: String,
        post_url: String,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Self, ProxyError> {
        let transport = Transport::Sse(crate::transport::SseConnection::new(SseTarget {
            sse_url,
            post_url,
            headers: headers.unwrap_or_default(),
        }));
        transport.connect().await?;
        Ok(Self { transport })
    }

    pub async fn list_tools(
        &self,
        params: Option<ListToolsRequestParams>,
        timeout: Option<Duration>,
    ) -> Result<ListToolsResult, ProxyError> {
        let value = self
            .transport
            .call(
                "tools/list",
                Some(serde_json::to_value(params.unwrap_or_default()).map_err(|e| {
                    ProxyError::Internal(format!("failed to serialize tools/list params: {e}"))
                })?),
                timeout.unwrap_or(DEFAULT_TIMEOUT),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ProxyError::Internal(format!("malformed tools/list result: {e}")))
    }

    pub async fn call_tool(
        &self,
        name: String,
        arguments: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult, ProxyError> {
        let params = CallToolRequestParams { name, arguments };
        let value = self
            .transport
            .call(
                "tools/call",
                Some(serde_json::to_value(params).map_err(|e| {
                    ProxyError::Internal(format!("failed to serialize tools/call params: {e}"))
                })?),
                timeout.unwrap_or(DEFAULT_TIMEOUT),
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ProxyError::Internal(format!("malformed tools/call result: {e}")))
    }

    pub async fn is_healthy(&self) -> bool {
        self.transport.is_healthy().await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdio_client_surfaces_spawn_failure() {
        let result =
            McpClient::new_stdio_client("definitely-not-a-real-binary-xyz".to_string(), vec![], None)
                .await;
        assert!(result.is_err());
    }
}
