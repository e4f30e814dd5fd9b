//! The tool bridge seam.
//!
//! The agent core only ever sees a [`ToolBridge`]: something that can list
//! extra tool definitions and execute a tool by name, returning text.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::errors::McpError;
use crate::inference::types::ToolDefinition;

/// External collaborator that contributes tools at runtime.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    /// Tools currently available. Called fresh every time; availability may
    /// change between calls.
    async fn list_definitions(&self) -> Result<Vec<ToolDefinition>, McpError>;

    /// Run `name` with `arguments` and return its text output.
    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> Result<String, McpError>;
}

/// Bridge used when no servers are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBridge;

#[async_trait]
impl ToolBridge for NoBridge {
    async fn list_definitions(&self) -> Result<Vec<ToolDefinition>, McpError> {
        Ok(Vec::new())
    }

    async fn execute(&self, name: &str, _arguments: &Map<String, Value>) -> Result<String, McpError> {
        Err(McpError::UnknownTool {
            name: name.to_string(),
        })
    }
}
