//! Relay configuration.
//!
//! Loaded from YAML, located via `AGENT_RELAY_CONFIG`, then
//! `./agent-relay.yaml`, then `<config dir>/agent-relay/config.yaml`. A
//! missing file yields defaults. `${VAR}` and `${VAR:-default}` are expanded
//! in the raw text before parsing, and a handful of environment variables
//! override individual keys afterwards.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::conversation::DEFAULT_SYSTEM_PROMPT;
use crate::agent_core::tool_registry::{BRIDGE_TOOL, SEARCH_TOOL, STORE_TOOL, WEATHER_TOOL};
use crate::agent_core::types::SessionDefaults;
use crate::inference::CompletionConfig;
use crate::mcp_client::BridgeServerConfig;

pub const CONFIG_PATH_VAR: &str = "AGENT_RELAY_CONFIG";
const LOCAL_CONFIG_FILE: &str = "agent-relay.yaml";
const APP_DIR: &str = "agent-relay";
const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid bind address '{value}': {reason}")]
    InvalidBind { value: String, reason: String },
}

// ─── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub completion: CompletionConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_system_prompt: String,
    pub default_enabled_tools: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_enabled_tools: [SEARCH_TOOL, WEATHER_TOOL, STORE_TOOL, BRIDGE_TOOL]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; `:memory:` keeps sessions in memory only.
    pub database_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// SerpApi key for `web_search`; simulated results without one.
    pub search_api_key: Option<String>,
    /// Search endpoint override, for SerpApi-compatible proxies.
    pub search_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub servers: HashMap<String, BridgeServerConfig>,
    /// Per-call `tools/call` timeout; 30 s when unset.
    pub call_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

// ─── Loading ────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Locate, read and parse the configuration, then apply environment
    /// overrides. Returns the file used, if any.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = locate_config_file();
        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok((config, path))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|reason| ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Parse YAML after variable expansion. An empty document is all
    /// defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self, String> {
        let expanded = interpolate_env_vars(raw);
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&expanded).map_err(|e| e.to_string())
    }

    /// Apply `AGENT_RELAY_*` and `SERPAPI_KEY` overrides. Blank values are
    /// ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AGENT_RELAY_BASE_URL") {
            self.completion.base_url = Some(v);
        }
        if let Some(v) = get("AGENT_RELAY_API_KEY") {
            self.completion.api_key = Some(v);
        }
        if let Some(v) = get("AGENT_RELAY_MODEL") {
            self.completion.default_model = v;
        }
        if let Some(v) = get("AGENT_RELAY_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("AGENT_RELAY_DB") {
            self.storage.database_path = Some(v);
        }
        if let Some(v) = get("SERPAPI_KEY") {
            self.tools.search_api_key = Some(v);
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .trim()
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidBind {
                value: self.server.bind.clone(),
                reason: e.to_string(),
            })
    }

    /// Configured database path, or `<data dir>/agent-relay/sessions.db`.
    pub fn database_path(&self) -> String {
        if let Some(path) = self.storage.database_path.as_deref().map(str::trim) {
            if !path.is_empty() {
                return path.to_string();
            }
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("sessions.db")
            .display()
            .to_string()
    }

    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            model: self.completion.default_model.clone(),
            system_prompt: self.session.default_system_prompt.clone(),
            enabled_tools: self.session.default_enabled_tools.clone(),
        }
    }
}

fn locate_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(expand_tilde(path.trim())));
        }
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join("config.yaml"))
        .filter(|path| path.is_file())
}

// ─── Env-var interpolation ──────────────────────────────────────────────────

/// Expand `${VAR}` and `${VAR:-default}`.
///
/// An unset variable without a default is left as written, so that an
/// unresolved credential is still recognisable as a placeholder.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };
        let expr = &after[..end];
        match resolve_var_expr(expr) {
            Some(value) => result.push_str(&value),
            None => result.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

fn resolve_var_expr(expr: &str) -> Option<String> {
    match expr.split_once(":-") {
        Some((name, default)) => Some(
            std::env::var(name.trim())
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| expand_tilde(default)),
        ),
        None => std::env::var(expr.trim()).ok(),
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_yaml_str("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.completion.default_model, "google-ai-studio/gemini-2.5-flash");
        assert_eq!(config.completion.max_tokens, 16_000);
        assert!(config.completion.is_mock());
        assert_eq!(
            config.session.default_enabled_tools,
            vec!["web_search", "get_weather", "d1_db", "mcp_server"]
        );
        assert!(config.bridge.servers.is_empty());
        assert!(config.bridge.call_timeout_ms.is_none());
        assert!(config.tools.search_endpoint.is_none());
        assert!(!config.logging.json);
        assert!(config.bind_addr().is_ok());
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
server:
  bind: 0.0.0.0:9000
completion:
  base_url: https://gateway.internal/v1
  api_key: sk-live-123
  default_model: gpt-4o-mini
session:
  default_system_prompt: Be terse.
  default_enabled_tools: [get_weather]
storage:
  database_path: ":memory:"
tools:
  search_endpoint: https://search.internal/search
bridge:
  call_timeout_ms: 5000
  servers:
    kv:
      command: kv-server
      args: ["--stdio"]
logging:
  json: true
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 9000);
        assert!(!config.completion.is_mock());
        assert_eq!(config.session_defaults().system_prompt, "Be terse.");
        assert_eq!(config.session_defaults().model, "gpt-4o-mini");
        assert_eq!(config.database_path(), ":memory:");
        assert_eq!(config.bridge.servers["kv"].args, vec!["--stdio"]);
        assert_eq!(config.bridge.call_timeout_ms, Some(5000));
        assert_eq!(
            config.tools.search_endpoint.as_deref(),
            Some("https://search.internal/search")
        );
        assert!(config.logging.json);
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        assert!(AppConfig::from_yaml_str("server: [unclosed").is_err());
    }

    #[test]
    fn test_interpolation() {
        std::env::set_var("__AGENT_RELAY_TEST_KEY__", "sk-from-env");
        std::env::remove_var("__AGENT_RELAY_TEST_UNSET__");

        assert_eq!(interpolate_env_vars("key: ${__AGENT_RELAY_TEST_KEY__}"), "key: sk-from-env");
        assert_eq!(
            interpolate_env_vars("url: ${__AGENT_RELAY_TEST_UNSET__:-http://localhost}"),
            "url: http://localhost"
        );
        assert_eq!(
            interpolate_env_vars("key: ${__AGENT_RELAY_TEST_UNSET__}"),
            "key: ${__AGENT_RELAY_TEST_UNSET__}"
        );
        assert_eq!(interpolate_env_vars("plain text"), "plain text");
        assert_eq!(interpolate_env_vars("dangling ${oops"), "dangling ${oops");

        std::env::remove_var("__AGENT_RELAY_TEST_KEY__");
    }

    #[test]
    fn test_unresolved_credential_stays_mock() {
        std::env::remove_var("__AGENT_RELAY_TEST_MISSING__");
        let yaml = "completion:\n  base_url: https://gateway.internal/v1\n  api_key: \"${__AGENT_RELAY_TEST_MISSING__}\"\n";
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert!(config.completion.is_mock());
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("AGENT_RELAY_BASE_URL", "https://override/v1"),
            ("AGENT_RELAY_API_KEY", "sk-override"),
            ("AGENT_RELAY_BIND", "127.0.0.1:1"),
            ("AGENT_RELAY_DB", "/tmp/relay.db"),
            ("AGENT_RELAY_MODEL", "  "),
            ("SERPAPI_KEY", "serp"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.completion.base_url.as_deref(), Some("https://override/v1"));
        assert_eq!(config.completion.api_key.as_deref(), Some("sk-override"));
        assert_eq!(config.server.bind, "127.0.0.1:1");
        assert_eq!(config.database_path(), "/tmp/relay.db");
        assert_eq!(config.tools.search_api_key.as_deref(), Some("serp"));
        // Blank override ignored.
        assert_eq!(config.completion.default_model, "google-ai-studio/gemini-2.5-flash");
    }
}
