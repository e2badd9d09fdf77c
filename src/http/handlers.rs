//! Axum HTTP handlers for the web server
//!
//! Provides the SSE session stream, the JSON-RPC message endpoint, and general
//! metadata endpoints.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::domain::tools::ToolName;
use crate::mcp::rpc::{INVALID_REQUEST, JSONRPC_VERSION};
use crate::mcp::session::{SessionEvent, SessionHandle};
use crate::AppState;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGE_PATH: &str = "/message";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub service: &'static str,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub sse: &'static str,
    pub message: &'static str,
    pub health: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: Endpoints,
    pub tools: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        service: env!("CARGO_PKG_NAME"),
        active_sessions: state.sessions.len(),
    })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: Endpoints {
            sse: SSE_PATH,
            message: MESSAGE_PATH,
            health: "/health",
        },
        tools: ToolName::ALL.into_iter().map(ToolName::as_str).collect(),
    })
}

pub async fn sse_connect(State(state): State<AppState>) -> Response {
    let (_, events) = state.sessions.open(greeting);
    let stream = events.map(|event| Ok::<_, Infallible>(to_sse_event(event)));

    (
        [
            (header::CONNECTION, "keep-alive"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

fn greeting(session: &SessionHandle) -> Vec<SessionEvent> {
    vec![
        SessionEvent::Endpoint(format!("{MESSAGE_PATH}?sessionId={}", session.id())),
        SessionEvent::Message(json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": "hello",
            "params": {
                "sessionId": session.id(),
                "server": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "timestamp": session.created_at().to_rfc3339_opts(SecondsFormat::Millis, true),
            }
        })),
    ]
}

fn to_sse_event(event: SessionEvent) -> Event {
    match event {
        SessionEvent::Endpoint(path) => Event::default().event("endpoint").data(path),
        SessionEvent::Message(message) => Event::default().event("message").data(message.to_string()),
        SessionEvent::Heartbeat => Event::default().comment("heartbeat"),
    }
}

pub async fn mcp_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let session = match query.session_id.as_deref() {
        Some(id) => {
            let session = state.sessions.get(id);
            if session.is_none() {
                warn!(session_id = %id, "message for unknown session");
            }
            session
        }
        None => None,
    };

    match state.dispatcher.handle(session.as_ref(), &body).await {
        Ok(response) => {
            let status = if response.error_code() == Some(INVALID_REQUEST) {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            (status, Json(response)).into_response()
        }
        Err(err) => err.into_response(),
    }
}
