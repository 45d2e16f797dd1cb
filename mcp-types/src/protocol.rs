//! The subset of Model Context Protocol domain types the proxy needs:
//! initialization, tool listing, and tool invocation. Resources, prompts,
//! sampling and elicitation are not modeled here because neither side of the
//! proxy (upstream server, downstream client) ever needs them.

use serde::Deserialize;
use serde::Serialize;

use crate::JSONRPCRequest;
use crate::RequestId;

/// Associates a request's method name with its param/result payload types,
/// mirroring how the MCP schema ties a method string to a request/response
/// pair. Used so `send_request`/`send_response` helpers can be generic over
/// "which request is this".
pub trait ModelContextProtocolRequest {
    const METHOD: &'static str;
    type Params: Serialize + for<'de> Deserialize<'de>;
    type Result: Serialize + for<'de> Deserialize<'de>;
}

pub trait ModelContextProtocolNotification {
    const METHOD: &'static str;
    type Params: Serialize + for<'de> Deserialize<'de>;
}

// ---------------------------------------------------------------------
// initialize
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ServerCapabilitiesTools>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilitiesTools {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

pub struct InitializeRequest;
impl ModelContextProtocolRequest for InitializeRequest {
    const METHOD: &'static str = "initialize";
    type Params = InitializeRequestParams;
    type Result = InitializeResult;
}

pub struct PingRequest;
impl ModelContextProtocolRequest for PingRequest {
    const METHOD: &'static str = "ping";
    type Params = Option<serde_json::Value>;
    type Result = serde_json::Value;
}

// ---------------------------------------------------------------------
// tools/list
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsRequestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// A single callable tool as exposed over `tools/list`. `input_schema` is an
/// arbitrary JSON Schema object; the proxy never interprets it beyond
/// hashing and forwarding it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub struct ListToolsRequest;
impl ModelContextProtocolRequest for ListToolsRequest {
    const METHOD: &'static str = "tools/list";
    type Params = ListToolsRequestParams;
    type Result = ListToolsResult;
}

// ---------------------------------------------------------------------
// tools/call
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequestParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text(TextContent),
    Image(ImageContent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Set by the proxy's fallback chain when this result was synthesized
    /// locally rather than returned by a downstream server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![ContentBlock::Text(TextContent {
                text: text.into(),
                annotations: None,
            })],
            is_error: Some(is_error),
            fallback: None,
        }
    }
}

pub struct CallToolRequest;
impl ModelContextProtocolRequest for CallToolRequest {
    const METHOD: &'static str = "tools/call";
    type Params = CallToolRequestParams;
    type Result = CallToolResult;
}

// ---------------------------------------------------------------------
// notifications/tools/list_changed
// ---------------------------------------------------------------------

pub struct ToolListChangedNotification;
impl ModelContextProtocolNotification for ToolListChangedNotification {
    const METHOD: &'static str = "notifications/tools/list_changed";
    type Params = Option<serde_json::Value>;
}

pub struct InitializedNotification;
impl ModelContextProtocolNotification for InitializedNotification {
    const METHOD: &'static str = "notifications/initialized";
    type Params = Option<serde_json::Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledNotificationParams {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct CancelledNotification;
impl ModelContextProtocolNotification for CancelledNotification {
    const METHOD: &'static str = "notifications/cancelled";
    type Params = CancelledNotificationParams;
}

// ---------------------------------------------------------------------
// Dispatch enums
// ---------------------------------------------------------------------

/// A JSON-RPC request sent by an upstream client, decoded by method name.
#[derive(Debug, Clone)]
pub enum ClientRequest {
    Initialize(InitializeRequestParams),
    Ping(Option<serde_json::Value>),
    ListTools(ListToolsRequestParams),
    CallTool(CallToolRequestParams),
}

#[derive(Debug, thiserror::Error)]
pub enum RequestConversionError {
    #[error("unknown method '{0}'")]
    UnknownMethod(String),
    #[error("failed to deserialize params for '{method}': {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TryFrom<JSONRPCRequest> for ClientRequest {
    type Error = RequestConversionError;

    fn try_from(request: JSONRPCRequest) -> Result<Self, Self::Error> {
        fn parse<T: for<'de> Deserialize<'de> + Default>(
            method: &str,
            params: Option<serde_json::Value>,
        ) -> Result<T, RequestConversionError> {
            match params {
                Some(value) => {
                    serde_json::from_value(value).map_err(|source| {
                        RequestConversionError::InvalidParams {
                            method: method.to_string(),
                            source,
                        }
                    })
                }
                None => Ok(T::default()),
            }
        }

        let JSONRPCRequest { method, params, .. } = request;
        match method.as_str() {
            "initialize" => Ok(ClientRequest::Initialize(parse(&method, params)?)),
            "ping" => Ok(ClientRequest::Ping(params)),
            "tools/list" => Ok(ClientRequest::ListTools(parse(&method, params)?)),
            "tools/call" => {
                let params = params.ok_or_else(|| RequestConversionError::InvalidParams {
                    method: method.clone(),
                    source: serde::de::Error::custom("missing params"),
                })?;
                let params: CallToolRequestParams =
                    serde_json::from_value(params).map_err(|source| {
                        RequestConversionError::InvalidParams {
                            method: method.clone(),
                            source,
                        }
                    })?;
                Ok(ClientRequest::CallTool(params))
            }
            other => Err(RequestConversionError::UnknownMethod(other.to_string())),
        }
    }
}

impl Default for InitializeRequestParams {
    fn default() -> Self {
        Self {
            protocol_version: String::new(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_tool_result_text_helper_sets_is_error() {
        let result = CallToolResult::text("boom", true);
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.content.len(), 1);
    }

    #[test]
    fn client_request_rejects_unknown_method() {
        let req = JSONRPCRequest {
            jsonrpc: crate::JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(1),
            method: "resources/list".to_string(),
            params: None,
        };
        let err = ClientRequest::try_from(req).unwrap_err();
        assert!(matches!(err, RequestConversionError::UnknownMethod(_)));
    }
}
