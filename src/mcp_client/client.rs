//! MCP client: the [`ToolBridge`] backed by stdio MCP servers.
//!
//! Tool lists are fetched from every running server on each call; a
//! tool-to-server route table is refreshed as a side effect and used to
//! dispatch `tools/call`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::bridge::ToolBridge;
use super::errors::McpError;
use super::lifecycle::{self, ManagedServer};
use super::types::{BridgeServerConfig, ToolCallOutcome, ToolsListResult};
use crate::inference::types::ToolDefinition;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for one `tools/call` (ms).
const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Timeout for one `tools/list` (ms).
const LIST_TIMEOUT_MS: u64 = 10_000;

// ─── McpClient ───────────────────────────────────────────────────────────────

pub struct McpClient {
    servers: Vec<ManagedServer>,
    /// tool name → server name, as of the last listing.
    routes: Mutex<HashMap<String, String>>,
    call_timeout_ms: u64,
}

impl McpClient {
    /// Start every configured server. Servers that fail to start are logged
    /// and left out.
    pub async fn start(configs: &HashMap<String, BridgeServerConfig>) -> Self {
        let (servers, errors) = lifecycle::spawn_all(configs).await;
        for (name, error) in &errors {
            tracing::error!(server = %name, error = %error, "bridge server failed to start");
        }
        tracing::info!(
            running = servers.len(),
            failed = errors.len(),
            "bridge servers started"
        );
        Self::from_servers(servers)
    }

    pub fn from_servers(servers: Vec<ManagedServer>) -> Self {
        Self {
            servers,
            routes: Mutex::new(HashMap::new()),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }

    pub fn with_call_timeout(mut self, timeout_ms: u64) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Shut every server down concurrently.
    pub async fn shutdown(&self) {
        futures::future::join_all(self.servers.iter().map(ManagedServer::shutdown)).await;
    }

    fn server(&self, name: &str) -> Option<&ManagedServer> {
        self.servers.iter().find(|s| s.name == name)
    }

    fn route(&self, tool: &str) -> Option<String> {
        self.routes.lock().ok()?.get(tool).cloned()
    }

    /// Ask every server for its tools. A server that fails to answer is
    /// skipped; the first server to list a name owns it.
    async fn discover(&self) -> Vec<(String, ToolDefinition)> {
        let mut found = Vec::new();
        for server in &self.servers {
            let listed = tokio::time::timeout(
                Duration::from_millis(LIST_TIMEOUT_MS),
                server.transport.request("tools/list", None),
            )
            .await;
            let value = match listed {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    tracing::warn!(server = %server.name, error = %e, "tools/list failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(server = %server.name, timeout_ms = LIST_TIMEOUT_MS, "tools/list timed out");
                    continue;
                }
            };
            let result: ToolsListResult = match serde_json::from_value(value) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(server = %server.name, error = %e, "unreadable tools/list result");
                    continue;
                }
            };
            for tool in result.tools {
                found.push((server.name.clone(), tool.to_tool_definition()));
            }
        }

        let mut routes = HashMap::new();
        found.retain(|(server, def)| {
            if routes.contains_key(def.name()) {
                tracing::warn!(tool = %def.name(), server = %server, "duplicate bridge tool ignored");
                return false;
            }
            routes.insert(def.name().to_string(), server.clone());
            true
        });
        if let Ok(mut table) = self.routes.lock() {
            *table = routes;
        }
        found
    }
}

#[async_trait]
impl ToolBridge for McpClient {
    async fn list_definitions(&self) -> Result<Vec<ToolDefinition>, McpError> {
        Ok(self.discover().await.into_iter().map(|(_, def)| def).collect())
    }

    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> Result<String, McpError> {
        let start = Instant::now();

        let server_name = match self.route(name) {
            Some(server) => server,
            None => {
                self.discover().await;
                self.route(name).ok_or_else(|| McpError::UnknownTool {
                    name: name.to_string(),
                })?
            }
        };
        let server = self.server(&server_name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })?;

        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let value = tokio::time::timeout(
            Duration::from_millis(self.call_timeout_ms),
            server.transport.request("tools/call", Some(params)),
        )
        .await
        .map_err(|_| McpError::Timeout {
            operation: format!("tools/call {name}"),
            timeout_ms: self.call_timeout_ms,
        })??;

        let outcome: ToolCallOutcome =
            serde_json::from_value(value).map_err(|e| McpError::TransportError {
                server: server_name.clone(),
                reason: format!("unreadable tools/call result: {e}"),
            })?;

        tracing::debug!(
            tool = %name,
            server = %server_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            is_error = outcome.is_error,
            "bridge tool call finished"
        );

        if outcome.is_error {
            return Err(McpError::ToolFailed {
                tool: name.to_string(),
                message: outcome.text(),
            });
        }
        Ok(outcome.text())
    }
}
