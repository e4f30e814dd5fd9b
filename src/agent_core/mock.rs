//! Local responder used when no completion endpoint is configured.
//!
//! Keyword matching picks at most one tool from those offered to the model
//! and fabricates a call to it; anything else gets an acknowledgement. The
//! output has the same shape as a live completion, so callers cannot tell
//! which path served them.

use serde_json::{Map, Value};

use super::tool_registry::{BRIDGE_TOOL, SEARCH_TOOL, STORE_TOOL, WEATHER_TOOL};
use super::types::{ToolCallRecord, ToolResult};
use crate::inference::accumulator::synthesize_call_id;
use crate::inference::types::{ToolCall, ToolDefinition};

const WEATHER_KEYWORDS: &[&str] = &["weather", "temperature", "forecast", "rain", "sunny"];
const SEARCH_KEYWORDS: &[&str] = &["search", "look up", "lookup", "google", "news", "find"];
const STORE_KEYWORDS: &[&str] = &["database", "sql", "query", "table", "store", "record"];
const BRIDGE_KEYWORDS: &[&str] = &["mcp", "bridge", "integration", "external"];

/// Content quoted back in a follow-up is cut to this many chars.
const QUOTE_LIMIT: usize = 280;

/// A synthetic first completion.
#[derive(Debug, Clone, PartialEq)]
pub struct MockReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Answer `message` without a network call.
pub fn respond(message: &str, offered: &[ToolDefinition]) -> MockReply {
    let lower = message.to_lowercase();
    let offers = |name: &str| offered.iter().any(|def| def.name() == name);
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if offers(WEATHER_TOOL) && mentions(WEATHER_KEYWORDS) {
        let location = extract_location(message).unwrap_or_else(|| "Global".to_string());
        return with_call(
            format!("Let me check the current weather in {location} for you. "),
            WEATHER_TOOL,
            [("location", Value::String(location))],
        );
    }

    if offers(SEARCH_TOOL) && mentions(SEARCH_KEYWORDS) {
        let query = message.trim().to_string();
        return with_call(
            "I'll search the web for that. ".to_string(),
            SEARCH_TOOL,
            [("query", Value::String(query)), ("num_results", Value::from(5))],
        );
    }

    if offers(STORE_TOOL) && mentions(STORE_KEYWORDS) {
        return with_call(
            "Running that against the structured store. ".to_string(),
            STORE_TOOL,
            [("query", Value::String("SELECT * FROM records LIMIT 10".into()))],
        );
    }

    if offers(BRIDGE_TOOL) && mentions(BRIDGE_KEYWORDS) {
        return with_call(
            "Checking the MCP bridge. ".to_string(),
            BRIDGE_TOOL,
            [("action", Value::String("list".into()))],
        );
    }

    MockReply {
        text: acknowledgement(message),
        tool_calls: Vec::new(),
    }
}

fn with_call<const N: usize>(text: String, tool: &str, arguments: [(&str, Value); N]) -> MockReply {
    let arguments: Map<String, Value> = arguments
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let raw_arguments = Value::Object(arguments.clone()).to_string();
    MockReply {
        text,
        tool_calls: vec![ToolCall {
            id: synthesize_call_id(),
            name: tool.to_string(),
            arguments,
            raw_arguments,
        }],
    }
}

fn acknowledgement(message: &str) -> String {
    let preview: String = message.trim().chars().take(80).collect();
    format!(
        "I received your message: \"{preview}\". No completion backend is configured, so this is a simulated reply. Ask about the weather, a web search, the data store or the MCP bridge to see tools in action."
    )
}

/// Text after the last " in ", minus trailing punctuation.
fn extract_location(message: &str) -> Option<String> {
    const MARKER: &str = " in ";
    // Offsets come from `message` itself; case folding can change byte lengths.
    let start = message
        .char_indices()
        .rev()
        .map(|(i, _)| i)
        .find(|&i| {
            message
                .get(i..i + MARKER.len())
                .is_some_and(|window| window.eq_ignore_ascii_case(MARKER))
        })?
        + MARKER.len();
    let location = message[start..]
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .trim();
    if location.is_empty() {
        None
    } else {
        Some(location.to_string())
    }
}

/// Synthetic follow-up describing executed tool calls.
pub fn follow_up_text(records: &[ToolCallRecord]) -> String {
    records
        .iter()
        .map(|record| match &record.result {
            ToolResult::Weather(report) => format!(
                "It is currently {}°C and {} in {}, with {}% humidity.",
                report.temperature,
                report.condition.to_lowercase(),
                report.location,
                report.humidity
            ),
            ToolResult::Content { content } => {
                let mut quoted: String = content.chars().take(QUOTE_LIMIT).collect();
                if quoted.len() < content.len() {
                    quoted.push_str("...");
                }
                format!("Here is what {} returned: {quoted}", record.name)
            }
            ToolResult::Error { error } => format!("The {} tool failed: {error}", record.name),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
