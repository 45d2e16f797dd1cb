//! Transport-agnostic JSON-RPC request handling for the upstream MCP
//! endpoint. One instance per connected upstream client, dispatching by
//! method name. The methods answered are exactly:
//! `initialize`, `tools/list`, `tools/call`, plus `ping` for liveness.

use std::sync::Arc;

use hypertool_core::ProxyRuntime;
use mcp_types::error_codes;
use mcp_types::CallToolRequestParams;
use mcp_types::ClientRequest;
use mcp_types::Implementation;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::ListToolsRequestParams;
use mcp_types::ListToolsResult;
use mcp_types::RequestId;
use mcp_types::ServerCapabilities;
use mcp_types::ServerCapabilitiesTools;
use mcp_types::Tool;
use mcp_types::JSONRPC_VERSION;
use tracing::info;
use tracing::warn;

/// One instance per connected upstream client (one stdio process, one HTTP
/// session). Holds only the handshake flag; all real state lives in the
/// shared [`ProxyRuntime`].
pub struct MessageProcessor {
    runtime: Arc<ProxyRuntime>,
    initialized: bool,
}

impl MessageProcessor {
    pub fn new(runtime: Arc<ProxyRuntime>) -> Self {
        Self {
            runtime,
            initialized: false,
        }
    }

    /// Dispatches one inbound JSON-RPC message, returning the response to
    /// send back (if any — notifications and malformed responses produce
    /// none).
    pub async fn handle(&mut self, message: JSONRPCMessage) -> Option<JSONRPCMessage> {
        match message {
            JSONRPCMessage::Request(request) => self.handle_request(request).await,
            JSONRPCMessage::Notification(notification) => {
                self.handle_notification(notification);
                None
            }
            JSONRPCMessage::Response(response) => {
                info!(id = %response.id, "ignoring unsolicited response from upstream client");
                None
            }
            JSONRPCMessage::Error(error) => {
                warn!(id = %error.id, "ignoring unsolicited error from upstream client");
                None
            }
            JSONRPCMessage::BatchRequest(batch) => {
                // The proxy does not itself batch replies; answer each item
                // independently and let the transport frame them as
                // separate lines, matching how a streaming JSON-RPC peer
                // would consume them.
                for item in batch {
                    match item {
                        mcp_types::JSONRPCBatchRequestItem::JSONRPCRequest(_) => {
                            warn!("batch requests are not supported; dropping item");
                        }
                        mcp_types::JSONRPCBatchRequestItem::JSONRPCNotification(n) => {
                            self.handle_notification(n);
                        }
                    }
                }
                None
            }
            JSONRPCMessage::BatchResponse(_) => None,
        }
    }

    async fn handle_request(&mut self, request: JSONRPCRequest) -> Option<JSONRPCMessage> {
        let id = request.id.clone();
        let method = request.method.clone();
        let client_request = match ClientRequest::try_from(request) {
            Ok(req) => req,
            Err(mcp_types::RequestConversionError::UnknownMethod(_)) => {
                return Some(error_response(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("unknown method '{method}'"),
                ));
            }
            Err(e) => {
                return Some(error_response(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("invalid params for '{method}': {e}"),
                ));
            }
        };

        match client_request {
            ClientRequest::Initialize(params) => Some(self.handle_initialize(id, params)),
            ClientRequest::Ping(_) => Some(response(id, serde_json::json!({}))),
            ClientRequest::ListTools(params) => Some(self.handle_list_tools(id, params).await),
            ClientRequest::CallTool(params) => Some(self.handle_call_tool(id, params).await),
        }
    }

    fn handle_notification(&mut self, notification: JSONRPCNotification) {
        info!(method = %notification.method, "received notification from upstream client");
    }

    fn handle_initialize(&mut self, id: RequestId, params: InitializeRequestParams) -> JSONRPCMessage {
        if self.initialized {
            return error_response(
                id,
                error_codes::INVALID_REQUEST,
                "initialize called more than once".to_string(),
            );
        }
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools {
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "hypertool-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: None,
        };
        response(id, serde_json::to_value(result).unwrap_or_default())
    }

    async fn handle_list_tools(
        &self,
        id: RequestId,
        _params: ListToolsRequestParams,
    ) -> JSONRPCMessage {
        let cache = self.runtime.cache.read().await;
        let toolset = self.runtime.toolset.read().await;
        let tools = toolset
            .get_mcp_tools(&cache)
            .into_iter()
            .map(|t| Tool {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
                output_schema: None,
                annotations: None,
            })
            .collect();
        let result = ListToolsResult {
            tools,
            next_cursor: None,
        };
        response(id, serde_json::to_value(result).unwrap_or_default())
    }

    async fn handle_call_tool(&self, id: RequestId, params: CallToolRequestParams) -> JSONRPCMessage {
        match self
            .runtime
            .router
            .call_tool(&params.name, params.arguments)
            .await
        {
            Ok(result) => response(id, serde_json::to_value(result).unwrap_or_default()),
            Err(err) => {
                let jsonrpc_error = err.to_jsonrpc_error();
                error_response(id, jsonrpc_error.code, jsonrpc_error.message)
            }
        }
    }
}

fn response(id: RequestId, result: serde_json::Value) -> JSONRPCMessage {
    JSONRPCMessage::Response(JSONRPCResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result,
    })
}

fn error_response(id: RequestId, code: i64, message: String) -> JSONRPCMessage {
    JSONRPCMessage::Error(JSONRPCError {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        error: JSONRPCErrorError {
            code,
            message,
            data: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypertool_core::config_store::FileConfigStore;
    use hypertool_core::config_store::StoreLayout;
    use hypertool_core::ProxyRuntimeConfig;

    async fn processor() -> (tempfile::TempDir, MessageProcessor) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FileConfigStore::new(StoreLayout {
            root: dir.path().to_path_buf(),
        }));
        let runtime = Arc::new(ProxyRuntime::new(
            store,
            ProxyRuntimeConfig {
                personas_root: dir.path().join("personas"),
                ..Default::default()
            },
        ));
        (dir, MessageProcessor::new(runtime))
    }

    fn initialize_request(id: i64) -> JSONRPCMessage {
        JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(id),
            method: "initialize".to_string(),
            params: Some(serde_json::json!({
                "protocolVersion": "2025-03-26",
                "clientInfo": {"name": "test-client", "version": "0.0.0"}
            })),
        })
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let (_dir, mut processor) = processor().await;
        processor.handle(initialize_request(1)).await;
        let second = processor.handle(initialize_request(2)).await;
        match second {
            Some(JSONRPCMessage::Error(e)) => {
                assert_eq!(e.error.code, error_codes::INVALID_REQUEST);
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_tool_universe_yields_empty_list() {
        let (_dir, processor) = processor().await;
        let request = JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            method: "tools/list".to_string(),
            params: None,
        });
        let mut processor = processor;
        let response = processor.handle(request).await;
        match response {
            Some(JSONRPCMessage::Response(r)) => {
                let result: ListToolsResult = serde_json::from_value(r.result).expect("valid result");
                assert!(result.tools.is_empty());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_tool_on_empty_universe_is_tool_not_found() {
        let (_dir, mut processor) = processor().await;
        let request = JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({"name": "git_status"})),
        });
        let response = processor.handle(request).await;
        match response {
            Some(JSONRPCMessage::Error(e)) => {
                assert_eq!(e.error.code, error_codes::METHOD_NOT_FOUND);
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_invalid_params_not_a_panic() {
        let (_dir, mut processor) = processor().await;
        let request = JSONRPCMessage::Request(JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            method: "resources/list".to_string(),
            params: None,
        });
        let response = processor.handle(request).await;
        assert!(matches!(response, Some(JSONRPCMessage::Error(_))));
    }
}
