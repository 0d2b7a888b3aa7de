//! Request/response wire types.
//!
//! Outbound: `{"method": "...", "params": [ { .. } ]}`.
//! Inbound: `{"result": { .. }}`, where a `result.status` of `"error"` marks
//! a node-side failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request sent over the request/response channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcRequest {
    /// Create a request with a single parameter object.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params: vec![params],
        }
    }
}

/// A node-side error extracted from a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RpcError {
    pub fn malformed(reason: &str) -> Self {
        Self {
            error: "malformedResponse".into(),
            error_code: None,
            error_message: Some(reason.to_string()),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_message {
            Some(msg) => write!(f, "{}: {}", self.error, msg),
            None => write!(f, "{}", self.error),
        }
    }
}

/// A reply from the request/response channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Value,
}

impl RpcResponse {
    /// Unwrap the result object or return the node's error.
    pub fn into_result(self) -> Result<Value, RpcError> {
        if !self.result.is_object() {
            return Err(RpcError::malformed("reply has no result object"));
        }
        if self.result.get("status").and_then(Value::as_str) == Some("error") {
            return Err(serde_json::from_value::<RpcError>(self.result)
                .unwrap_or_else(|_| RpcError::malformed("unreadable error reply")));
        }
        Ok(self.result)
    }
}
