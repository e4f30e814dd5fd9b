//! Tool registry: the catalog offered to the model.
//!
//! Built-in tools are fixed; bridge tools are fetched on every listing and
//! never cached. Filtering by a session's enabled set is the caller's job.

use std::sync::Arc;

use serde_json::json;

use crate::inference::types::ToolDefinition;
use crate::mcp_client::ToolBridge;

pub const WEATHER_TOOL: &str = "get_weather";
pub const SEARCH_TOOL: &str = "web_search";
pub const STORE_TOOL: &str = "d1_db";
pub const BRIDGE_TOOL: &str = "mcp_server";

/// Names of the built-in tools, in catalog order.
pub const BUILTIN_TOOLS: [&str; 4] = [WEATHER_TOOL, SEARCH_TOOL, STORE_TOOL, BRIDGE_TOOL];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_TOOLS.contains(&name)
}

/// Definitions of the built-in tools.
pub fn builtin_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            WEATHER_TOOL,
            "Get current weather information for a location",
            json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string", "description": "The city or location name" }
                },
                "required": ["location"]
            }),
        ),
        ToolDefinition::function(
            SEARCH_TOOL,
            "Search the web or fetch content from a specific URL",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "url": { "type": "string", "description": "Specific URL to fetch content from (alternative to search)" },
                    "num_results": { "type": "number", "description": "Number of search results to return (default: 5, max: 10)", "default": 5 }
                },
                "required": []
            }),
        ),
        ToolDefinition::function(
            STORE_TOOL,
            "Execute SQL queries against the structured edge store",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The SQL query to execute (SELECT, INSERT, etc)" }
                },
                "required": ["query"]
            }),
        ),
        ToolDefinition::function(
            BRIDGE_TOOL,
            "Interact with external systems through the MCP bridge",
            json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "description": "Action to perform (list, call, connect)" },
                    "endpoint": { "type": "string", "description": "The target MCP service endpoint" }
                },
                "required": ["action"]
            }),
        ),
    ]
}

/// Keep only definitions whose name is in `enabled`, preserving catalog order.
pub fn filter_enabled(definitions: Vec<ToolDefinition>, enabled: &[String]) -> Vec<ToolDefinition> {
    definitions
        .into_iter()
        .filter(|def| enabled.iter().any(|name| name == def.name()))
        .collect()
}

/// Built-ins plus whatever the bridge offers right now.
#[derive(Clone)]
pub struct ToolRegistry {
    bridge: Arc<dyn ToolBridge>,
}

impl ToolRegistry {
    pub fn new(bridge: Arc<dyn ToolBridge>) -> Self {
        Self { bridge }
    }

    /// Full catalog. A failing bridge contributes nothing; built-ins are
    /// always returned. Bridge tools shadowing a built-in name are dropped.
    pub async fn list_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = builtin_definitions();
        match self.bridge.list_definitions().await {
            Ok(extra) => {
                for def in extra {
                    if is_builtin(def.name()) {
                        tracing::warn!(tool = %def.name(), "bridge tool shadows a built-in, ignored");
                        continue;
                    }
                    definitions.push(def);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "bridge discovery failed, offering built-in tools only");
            }
        }
        definitions
    }
}
