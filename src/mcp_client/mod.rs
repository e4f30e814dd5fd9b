//! MCP client: the external tool bridge.
//!
//! This module handles:
//! - Spawning MCP server child processes and the initialize handshake
//! - JSON-RPC 2.0 communication over process stdio
//! - Tool discovery across all servers on every listing
//! - Routing tool calls to the owning server
//!
//! The agent core reaches it only through the [`ToolBridge`] trait.

pub mod bridge;
pub mod client;
pub mod errors;
pub mod lifecycle;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use bridge::{NoBridge, ToolBridge};
pub use client::McpClient;
pub use errors::McpError;
pub use types::BridgeServerConfig;
