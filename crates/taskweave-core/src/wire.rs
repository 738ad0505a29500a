//! Tool wire protocol — one-shot JSON-RPC 2.0 over child stdio
//!
//! One request line in, one response line out. Standard error is diagnostic
//! only and never parsed as protocol.
//!
//! Request:  { "jsonrpc": "2.0", "id": 1, "method": "query", "params": {...} }
//! Response: { "jsonrpc": "2.0", "id": 1, "result": {...} }
//!           { "jsonrpc": "2.0", "id": 1, "error": { "code": 503, "message": "..." } }

use serde::{Deserialize, Serialize};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request written to a tool server's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Response read from a tool server's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(serde_json::json!(id)),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(serde_json::json!(id)),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Whether this response correlates with the given request id.
    pub fn matches(&self, id: u64) -> bool {
        self.id.as_ref().and_then(|v| v.as_u64()) == Some(id)
    }
}

/// JSON-RPC error object, carrying the tool-declared code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req = RpcRequest::new(7, "query", serde_json::json!({"where": "x = 1"}));
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains(r#""jsonrpc":"2.0""#));
        assert!(line.contains(r#""id":7"#));
        assert!(line.contains(r#""method":"query""#));
    }

    #[test]
    fn response_id_matching() {
        let resp: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":{"rows":4}}"#).unwrap();
        assert!(resp.matches(7));
        assert!(!resp.matches(8));
        assert!(resp.error.is_none());
    }

    #[test]
    fn error_response_carries_code() {
        let resp: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":503,"message":"busy"}}"#,
        )
        .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, 503);
        assert_eq!(err.message, "busy");
    }

    #[test]
    fn missing_id_never_matches() {
        let resp: RpcResponse = serde_json::from_str(r#"{"result":{}}"#).unwrap();
        assert!(!resp.matches(1));
    }
}
