use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// `sessionId` query parameter a message post is correlated with, if any.
pub fn session_id_of(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "sessionId")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let session_id = session_id_of(request.uri().query());
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let session_id = session_id.as_deref().unwrap_or("-");

    // SSE streams return their headers immediately; the duration covers setup only.
    info!(
        method = %method,
        path = %path,
        session_id,
        status = status.as_u16(),
        duration_ms = started_at.elapsed().as_millis(),
        "request summary"
    );

    if status.is_server_error() {
        warn!(
            method = %method,
            path = %path,
            session_id,
            status = status.as_u16(),
            "request failed"
        );
    }

    response
}
