//! Tool executor.
//!
//! Runs one tool call and normalizes the outcome into a [`ToolResult`].
//! [`ToolExecutor::execute`] never fails: every error becomes
//! `ToolResult::Error` so that one broken call cannot abort its siblings or
//! the turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::tool_registry::{BRIDGE_TOOL, SEARCH_TOOL, STORE_TOOL, WEATHER_TOOL};
use super::types::{ToolResult, WeatherReport};
use crate::mcp_client::{McpError, ToolBridge};

// ─── Constants ──────────────────────────────────────────────────────────────

const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search";

const DEFAULT_NUM_RESULTS: u64 = 5;
const MAX_NUM_RESULTS: u64 = 10;

/// Fetched pages are cut to this many bytes before reaching the model.
const MAX_PAGE_BYTES: usize = 8_000;

/// Timeout for search and page fetches.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

const WEATHER_CONDITIONS: &[&str] = &["Clear", "Partly cloudy", "Overcast", "Light rain", "Windy"];

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Why a tool call failed. Converted into `ToolResult::Error` by the executor.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("missing required argument '{argument}' for {tool}")]
    MissingArgument { tool: String, argument: String },

    #[error("{backend} request failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error(transparent)]
    Bridge(#[from] McpError),
}

// ─── SerpApi response ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeGraph {
    title: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    answer: Option<String>,
    snippet: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

// ─── ToolExecutor ───────────────────────────────────────────────────────────

pub struct ToolExecutor {
    bridge: Arc<dyn ToolBridge>,
    http: reqwest::Client,
    search_api_key: Option<String>,
    search_endpoint: String,
}

impl ToolExecutor {
    pub fn new(bridge: Arc<dyn ToolBridge>, search_api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            bridge,
            http,
            search_api_key: search_api_key.filter(|key| !key.trim().is_empty()),
            search_endpoint: SERPAPI_ENDPOINT.to_string(),
        }
    }

    /// Point search requests somewhere other than SerpApi.
    pub fn with_search_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.search_endpoint = endpoint.into();
        self
    }

    /// Run `name` with `arguments`. Never fails.
    pub async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> ToolResult {
        let start = Instant::now();
        let result = match self.try_execute(name, arguments).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(e.to_string()),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if let ToolResult::Error { error } = &result {
            tracing::warn!(tool = %name, elapsed_ms, success = false, error = %error, "tool execution failed");
        } else {
            tracing::info!(tool = %name, elapsed_ms, success = true, "tool executed");
        }
        result
    }

    async fn try_execute(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError> {
        match name {
            WEATHER_TOOL => Ok(ToolResult::Weather(fabricate_weather(
                str_arg(arguments, "location").unwrap_or("Global"),
            ))),
            SEARCH_TOOL => self.web_search(arguments).await.map(ToolResult::content),
            STORE_TOOL => {
                let query = str_arg(arguments, "query").ok_or_else(|| ToolError::MissingArgument {
                    tool: STORE_TOOL.into(),
                    argument: "query".into(),
                })?;
                let mut hash = uuid::Uuid::new_v4().simple().to_string();
                hash.truncate(8);
                Ok(ToolResult::content(format!(
                    "Structured store synchronized. Query processed: {query}. Transaction hash: 0x{hash}."
                )))
            }
            BRIDGE_TOOL => self.bridge_status(arguments).await.map(ToolResult::content),
            other => {
                let output = self.bridge.execute(other, arguments).await?;
                Ok(ToolResult::content(output))
            }
        }
    }

    // ─── web_search ─────────────────────────────────────────────────────

    async fn web_search(&self, arguments: &Map<String, Value>) -> Result<String, ToolError> {
        if let Some(url) = str_arg(arguments, "url") {
            return self.fetch_page(url).await;
        }

        let query = str_arg(arguments, "query").unwrap_or("latest news");
        let num_results = num_results(arguments);

        let Some(api_key) = &self.search_api_key else {
            return Ok(format!(
                "[SIMULATED SEARCH] Results for: \"{query}\". Configure a search API key for real results."
            ));
        };

        let num = num_results.to_string();
        let response = self
            .http
            .get(&self.search_endpoint)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("api_key", api_key.as_str()),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| backend("search", e))?;

        if !response.status().is_success() {
            return Err(ToolError::Backend {
                backend: "search".into(),
                reason: format!("HTTP {}", response.status().as_u16()),
            });
        }

        let data: SearchResponse = response.json().await.map_err(|e| backend("search", e))?;
        if let Some(error) = &data.error {
            return Err(ToolError::Backend {
                backend: "search".into(),
                reason: error.clone(),
            });
        }
        Ok(format_search_results(&data, query, num_results as usize))
    }

    async fn fetch_page(&self, url: &str) -> Result<String, ToolError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| backend("fetch", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Backend {
                backend: "fetch".into(),
                reason: format!("HTTP {} from {url}", status.as_u16()),
            });
        }
        // One byte past the cap is enough to know the page was cut.
        let limit = MAX_PAGE_BYTES + 1;
        let mut body = Vec::with_capacity(limit);
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| backend("fetch", e))?;
            let take = chunk.len().min(limit - body.len());
            body.extend_from_slice(&chunk[..take]);
            if body.len() >= limit {
                break;
            }
        }
        let body = String::from_utf8_lossy(&body);
        Ok(format!("Content from {url}:\n\n{}", truncate_utf8(body.trim(), MAX_PAGE_BYTES)))
    }

    // ─── mcp_server ─────────────────────────────────────────────────────

    async fn bridge_status(&self, arguments: &Map<String, Value>) -> Result<String, ToolError> {
        let action = str_arg(arguments, "action").ok_or_else(|| ToolError::MissingArgument {
            tool: BRIDGE_TOOL.into(),
            argument: "action".into(),
        })?;
        let endpoint = str_arg(arguments, "endpoint").unwrap_or("system-v1");

        if action.eq_ignore_ascii_case("list") {
            let tools = self.bridge.list_definitions().await?;
            if tools.is_empty() {
                return Ok("MCP bridge active. No bridge tools are available.".to_string());
            }
            let lines: Vec<String> = tools
                .iter()
                .map(|t| format!("- {}: {}", t.name(), t.function.description))
                .collect();
            return Ok(format!("MCP bridge tools:\n{}", lines.join("\n")));
        }

        Ok(format!(
            "MCP bridge active. Action: {action}. Endpoint: {endpoint}. Tunnel established."
        ))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn backend(name: &str, e: reqwest::Error) -> ToolError {
    ToolError::Backend {
        backend: name.to_string(),
        reason: e.to_string(),
    }
}

/// Non-blank string argument.
fn str_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `num_results` as number or numeric string, clamped to 1..=10.
fn num_results(arguments: &Map<String, Value>) -> u64 {
    let requested = match arguments.get("num_results") {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    requested.unwrap_or(DEFAULT_NUM_RESULTS).clamp(1, MAX_NUM_RESULTS)
}

fn fabricate_weather(location: &str) -> WeatherReport {
    let mut rng = rand::thread_rng();
    WeatherReport {
        location: location.to_string(),
        temperature: rng.gen_range(20..30),
        condition: WEATHER_CONDITIONS
            .choose(&mut rng)
            .copied()
            .unwrap_or("Clear")
            .to_string(),
        humidity: 50,
    }
}

fn format_search_results(data: &SearchResponse, query: &str, limit: usize) -> String {
    let mut sections = Vec::new();

    if let Some(KnowledgeGraph {
        title: Some(title),
        description: Some(description),
    }) = &data.knowledge_graph
    {
        sections.push(format!("**{title}**\n{description}"));
    }

    if let Some(answer_box) = &data.answer_box {
        if let Some(answer) = &answer_box.answer {
            sections.push(format!("**Answer**: {answer}"));
        } else if let Some(snippet) = &answer_box.snippet {
            let title = answer_box.title.as_deref().unwrap_or("Answer");
            sections.push(format!("**{title}**: {snippet}"));
        }
    }

    let organic = data
        .organic_results
        .iter()
        .filter_map(|r| Some((r.title.as_deref()?, r.link.as_deref()?, r.snippet.as_deref())))
        .take(limit);
    for (i, (title, link, snippet)) in organic.enumerate() {
        let mut entry = format!("{}. **{title}**\n   Link: {link}", i + 1);
        if let Some(snippet) = snippet {
            entry.push_str(&format!("\n   {snippet}"));
        }
        sections.push(entry);
    }

    if sections.is_empty() {
        format!("No results for \"{query}\".")
    } else {
        sections.join("\n\n")
    }
}

/// Cut `s` to at most `max_bytes`, on a char boundary.
fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &s[..end])
}

// ─── Tests ──────────────────────────────────────────────────────────────────
