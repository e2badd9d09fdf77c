//! The central Model Context Protocol engine
//!
//! Decodes JSON-RPC envelopes, routes them over the closed [`Method`] table and
//! turns tool outcomes into response envelopes. Every call receives the SSE
//! session it was correlated with (if any) so that admission can depend on it.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rust_mcp_sdk::schema::{
    CallToolResult, ContentBlock, Implementation, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerCapabilitiesTools, TextContent,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::devops_client::WorkTrackingClient;
use crate::domain::tools::{build_tools_list, call_tool, ToolName};
use crate::errors::AppError;
use crate::mcp::rpc::{
    app_error_to_json_rpc, invalid_request, method_not_found, salvage_id, JsonRpcRequest,
    JsonRpcResponse,
};
use crate::mcp::session::SessionHandle;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    ToolsList,
    ToolsCall,
    NotificationsInitialized,
    Ping,
    Hello,
}

impl Method {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "initialize" => Some(Self::Initialize),
            "tools/list" => Some(Self::ToolsList),
            "tools/call" => Some(Self::ToolsCall),
            "notifications/initialized" => Some(Self::NotificationsInitialized),
            "ping" => Some(Self::Ping),
            "hello" => Some(Self::Hello),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::NotificationsInitialized => "notifications/initialized",
            Self::Ping => "ping",
            Self::Hello => "hello",
        }
    }
}

/// Decides whether a routed request may run given its session correlation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPolicy {
    /// Requests are served whether or not they name a live session.
    #[default]
    Stateless,
    /// `tools/call` must arrive on a live SSE session.
    RequireSession,
}

impl SessionPolicy {
    pub fn admit(self, method: Method, session: Option<&SessionHandle>) -> Result<(), String> {
        match (self, method) {
            (Self::RequireSession, Method::ToolsCall) => match session {
                Some(session) if session.is_alive() => Ok(()),
                Some(_) => Err("session is closed".to_string()),
                None => Err("tools/call requires an open SSE session".to_string()),
            },
            _ => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn WorkTrackingClient>,
    policy: SessionPolicy,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn WorkTrackingClient>, policy: SessionPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// `Err` is reserved for failures outside the JSON-RPC error model.
    pub async fn handle(
        &self,
        session: Option<&SessionHandle>,
        body: &[u8],
    ) -> Result<JsonRpcResponse, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(invalid_request(Value::Null, "request body is empty"));
        }

        // Only an object is an envelope; derived decoding would also take arrays.
        let request: JsonRpcRequest = match serde_json::from_slice::<Value>(body) {
            Ok(envelope @ Value::Object(_)) => match serde_json::from_value(envelope) {
                Ok(request) => request,
                Err(_) => {
                    return Ok(invalid_request(
                        salvage_id(body),
                        "request body is not a JSON-RPC envelope",
                    ))
                }
            },
            Ok(_) => {
                return Ok(invalid_request(
                    Value::Null,
                    "request body must be a JSON object",
                ))
            }
            Err(_) => {
                return Ok(invalid_request(
                    salvage_id(body),
                    "request body is not a JSON-RPC envelope",
                ))
            }
        };

        match request.jsonrpc.as_deref() {
            Some("2.0") => {}
            Some(_) => return Ok(invalid_request(request.id, "jsonrpc must be \"2.0\"")),
            None => return Ok(invalid_request(request.id, "jsonrpc field is missing")),
        }

        if let Some(error) = request.error {
            warn!(
                id = %request.id,
                session_id = session.map(SessionHandle::id).unwrap_or("-"),
                error = %error,
                "peer reported an error"
            );
            return Ok(JsonRpcResponse::result(
                request.id,
                json!({ "acknowledged": true }),
            ));
        }

        let Some(method_name) = request.method.filter(|method| !method.trim().is_empty()) else {
            return Ok(invalid_request(request.id, "method field is missing"));
        };

        let Some(method) = Method::parse(&method_name) else {
            audit(&method_name, session, request.params.as_ref(), "failure");
            return Ok(method_not_found(request.id, &method_name));
        };

        if let Err(reason) = self.policy.admit(method, session) {
            audit(&method_name, session, request.params.as_ref(), "rejected");
            return Ok(invalid_request(request.id, &reason));
        }

        let audit_params = request.params.clone();
        let response = self
            .route(method, session, request.id, request.params)
            .await?;

        audit(
            method.as_str(),
            session,
            audit_params.as_ref(),
            if response.is_error() { "failure" } else { "success" },
        );

        Ok(response)
    }

    async fn route(
        &self,
        method: Method,
        session: Option<&SessionHandle>,
        id: Value,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, AppError> {
        let response = match method {
            Method::Initialize => JsonRpcResponse::result(id, to_result(initialize_result())?),
            Method::ToolsList => JsonRpcResponse::result(
                id,
                to_result(ListToolsResult {
                    meta: None,
                    next_cursor: None,
                    tools: build_tools_list(),
                })?,
            ),
            Method::ToolsCall => self.call(id, params).await?,
            Method::NotificationsInitialized | Method::Ping => JsonRpcResponse::result(id, json!({})),
            Method::Hello => JsonRpcResponse::result(
                id,
                json!({
                    "message": "hello",
                    "server": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "sessionId": session.map(SessionHandle::id),
                    "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                }),
            ),
        };

        Ok(response)
    }

    async fn call(&self, id: Value, params: Option<Value>) -> Result<JsonRpcResponse, AppError> {
        let params = params.unwrap_or(Value::Null);

        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Ok(app_error_to_json_rpc(
                id,
                AppError::invalid_arguments("Missing tool name in params.name"),
            ));
        };

        let Some(tool) = ToolName::parse(name) else {
            return Ok(app_error_to_json_rpc(
                id,
                AppError::invalid_arguments(format!("Unknown tool: {name}")),
            ));
        };

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(arguments)) => arguments.clone(),
            Some(_) => {
                return Ok(app_error_to_json_rpc(
                    id,
                    AppError::invalid_arguments("params.arguments must be an object"),
                ))
            }
        };

        match call_tool(self.client.as_ref(), tool, arguments).await {
            Ok(text) => {
                let result = CallToolResult {
                    content: vec![ContentBlock::from(TextContent::new(text, None, None))],
                    is_error: None,
                    meta: None,
                    structured_content: None,
                };
                Ok(JsonRpcResponse::result(id, to_result(result)?))
            }
            Err(err) => Ok(app_error_to_json_rpc(id, err)),
        }
    }
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Azure DevOps MCP bridge".to_string()),
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            resources: None,
            prompts: None,
            ..Default::default()
        },
        protocol_version: SUPPORTED_PROTOCOL_VERSION.to_string(),
        instructions: None,
        meta: None,
    }
}

fn to_result(value: impl Serialize) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|err| AppError::internal(format!("result serialization failed: {err}")))
}

fn audit(method: &str, session: Option<&SessionHandle>, params: Option<&Value>, outcome: &str) {
    info!(
        method = %method,
        session_id = session.map(SessionHandle::id).unwrap_or("-"),
        params = %redact_audit_params(params),
        outcome,
        "mcp action audited"
    );
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    ["token", "secret", "password", "credential", "authorization", "apikey", "api_key", "pat"]
        .iter()
        .any(|needle| {
            if *needle == "pat" {
                normalized == "pat"
            } else {
                normalized.contains(needle)
            }
        })
}
