//! HTTP Transport layer for the Model Context Protocol
//!
//! Provides the SSE session stream, the JSON-RPC message endpoints and the
//! permissive CORS handling browser-hosted clients need.

pub mod handlers;

use tower_http::cors::{Any, CorsLayer};

/// Any origin, method and header. The layer answers every `OPTIONS` request
/// itself with 200, so no route sees one.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
