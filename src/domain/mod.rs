//! Tool registry and result rendering
//!
//! Provides the Azure DevOps operations exposed over the MCP protocol.

pub mod format;
pub mod tools;
