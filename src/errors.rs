use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::mcp::rpc::{JsonRpcResponse, INTERNAL_ERROR};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Azure DevOps client is not initialized: set AZURE_DEVOPS_ORG_URL and AZURE_DEVOPS_PAT")]
    NotInitialized,
    #[error("upstream request failed ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("{message}")]
    InvalidArguments { message: String },
    #[error("{message}")]
    ToolFailed { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn tool_failed(message: impl Into<String>) -> Self {
        Self::ToolFailed {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::upstream(status.as_u16(), err.to_string()),
            None => Self::internal(format!("azure devops request failed: {err}")),
        }
    }
}

/// Only reached when something escapes the dispatcher's own JSON-RPC error path.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed with internal error");
        let body = JsonRpcResponse::error(
            serde_json::Value::Null,
            INTERNAL_ERROR,
            "Internal error",
            Some(json!("internal server error")),
        );

        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// Response used by the panic-catching layer.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "request handler panicked");

    AppError::internal(detail.to_string()).into_response()
}
