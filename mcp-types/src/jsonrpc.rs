use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// A JSON-RPC request id: either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Integer(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCErrorError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

pub type JSONRPCBatchRequest = Vec<JSONRPCBatchRequestItem>;
pub type JSONRPCBatchResponse = Vec<JSONRPCBatchResponseItem>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCBatchRequestItem {
    JSONRPCRequest(JSONRPCRequest),
    JSONRPCNotification(JSONRPCNotification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCBatchResponseItem {
    JSONRPCResponse(JSONRPCResponse),
    JSONRPCError(JSONRPCError),
}

/// Any one JSON-RPC message that can appear, framed one-per-line, on an MCP
/// transport. Order of variants matters for `#[serde(untagged)]` resolution:
/// batches (arrays) are tried first, then the single-object shapes in order
/// of how discriminating their required fields are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    BatchRequest(JSONRPCBatchRequest),
    BatchResponse(JSONRPCBatchResponse),
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

/// The outcome of a single JSON-RPC call as seen by a client awaiting a
/// matched response: either the `result` value or the `error` object.
pub type Result = std::result::Result<serde_json::Value, JSONRPCErrorError>;

/// JSON-RPC reserved error codes used when the proxy itself raises a
/// protocol-level error (as opposed to wrapping a downstream tool error).
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Start of the range reserved for application-defined errors.
    pub const SERVER_ERROR_START: i64 = -32099;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_round_trips_both_variants() {
        let s = serde_json::to_string(&RequestId::String("abc".into())).unwrap_or_default();
        assert_eq!(s, "\"abc\"");
        let n = serde_json::to_string(&RequestId::Integer(7)).unwrap_or_default();
        assert_eq!(n, "7");
    }

    #[test]
    fn message_untagged_dispatch() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#;
        let msg: JSONRPCMessage = serde_json::from_str(line).expect("parses as request");
        assert!(matches!(msg, JSONRPCMessage::Request(_)));

        let line = r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#;
        let msg: JSONRPCMessage = serde_json::from_str(line).expect("parses as notification");
        assert!(matches!(msg, JSONRPCMessage::Notification(_)));
    }
}
