//! JSON-RPC envelope representations and formatting utilities
//!
//! Requests are decoded leniently so that the dispatcher can echo the caller's
//! `id` even when the rest of the envelope is malformed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    /// Some clients echo failures back as pseudo-requests carrying `error`.
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// `id` is always serialized, including as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl JsonRpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Error(RpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    pub fn error_code(&self) -> Option<i64> {
        match &self.outcome {
            Outcome::Error(error) => Some(error.code),
            Outcome::Result(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_code().is_some()
    }
}

/// Best-effort id extraction from a body that failed envelope decoding.
pub fn salvage_id(body: &[u8]) -> Value {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("id").cloned())
        .unwrap_or(Value::Null)
}

pub fn invalid_request(id: Value, detail: &str) -> JsonRpcResponse {
    JsonRpcResponse::error(id, INVALID_REQUEST, "Invalid Request", Some(json!(detail)))
}

pub fn method_not_found(id: Value, method: &str) -> JsonRpcResponse {
    JsonRpcResponse::error(
        id,
        METHOD_NOT_FOUND,
        "Method not found",
        Some(json!({ "method": method })),
    )
}

/// Tool, argument and backend failures share one code and differ only in text.
pub fn app_error_to_json_rpc(id: Value, err: AppError) -> JsonRpcResponse {
    match err {
        AppError::InvalidArguments { message } => {
            JsonRpcResponse::error(id, INTERNAL_ERROR, message.clone(), Some(json!(message)))
        }
        other => JsonRpcResponse::error(
            id,
            INTERNAL_ERROR,
            "Tool execution failed",
            Some(json!(other.to_string())),
        ),
    }
}
