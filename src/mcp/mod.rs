//! Model Context Protocol server handling and JSON-RPC implementations
//!
//! Provides envelope validation and routing, plus the SSE session lifecycle
//! requests are correlated with.

pub mod rpc;
pub mod server;
pub mod session;
