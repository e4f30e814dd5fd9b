//! Shared types for the completion client.
//!
//! Request types mirror the OpenAI Chat Completions API. Raw streaming chunk
//! types are converted into validated [`DeltaEvent`]s before anything else in
//! the crate sees them, so transport quirks (null fields, missing indices,
//! empty strings) stop at this boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Request Types ───────────────────────────────────────────────────────────

/// A single message in the completion request.
///
/// `content` is emitted as `""` rather than `null` when absent; several
/// OpenAI-compatible gateways reject `null` on assistant tool-call entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<String>,
    /// Tool results are sent back as `tool` role messages tagged with the call id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Assistant messages may carry the tool calls they requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Synthetic assistant entry announcing the tool calls it requested.
    pub fn assistant_tool_calls(calls: Vec<ToolCallResponse>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    /// Tool result entry, tagged with the originating call id.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(value.as_deref().unwrap_or(""))
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool definition as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    /// Build a `function`-typed definition.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Function definition within a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped description of the arguments.
    pub parameters: Value,
}

/// Request body for `POST {base_url}/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Omitted entirely when no tool is enabled for the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Number of tools advertised, zero when the field is omitted.
    pub fn tool_count(&self) -> usize {
        self.tools.as_ref().map_or(0, Vec::len)
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// A finalized tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Call id from the transport, or a synthesized one.
    pub id: String,
    pub name: String,
    /// Parsed arguments; empty when the raw text was not a JSON object.
    pub arguments: Map<String, Value>,
    /// Arguments exactly as the model produced them.
    pub raw_arguments: String,
}

impl ToolCall {
    /// Wire descriptor echoed back to the model in the follow-up request.
    pub fn to_response(&self) -> ToolCallResponse {
        ToolCallResponse {
            id: self.id.clone(),
            r#type: "function".to_string(),
            function: FunctionCallResponse {
                name: self.name.clone(),
                arguments: self.raw_arguments.clone(),
            },
        }
    }
}

/// Tool call as carried in the OpenAI message format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCallResponse,
}

/// Function call details in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

/// Result of a buffered (non-streaming) completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionMessage {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

// ─── Streaming Wire Types ────────────────────────────────────────────────────

/// Raw SSE chunk from the completion endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a streaming chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The incremental update within a chunk choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// A tool call fragment as delivered by the transport.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkToolCall {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ChunkFunction>,
}

/// A function call fragment within a streaming tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ─── Validated Deltas ────────────────────────────────────────────────────────

/// One validated piece of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaFragment {
    /// Assistant text to forward to the caller.
    Text(String),
    /// Partial tool call, keyed by its transport index.
    ToolCall(ToolCallFragment),
}

/// A partial tool call. Absent and empty fields are both `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// All fragments carried by one SSE event, in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaEvent {
    pub fragments: Vec<DeltaFragment>,
    pub finish_reason: Option<String>,
}

impl DeltaEvent {
    /// Event carrying a single text fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            fragments: vec![DeltaFragment::Text(text.into())],
            finish_reason: None,
        }
    }

    /// Validate a raw chunk.
    ///
    /// Only the first choice is considered. A tool call fragment without an
    /// `index` takes its position within the chunk's `tool_calls` array.
    pub fn from_chunk(chunk: ChatCompletionChunk) -> Self {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Self::default();
        };

        let mut fragments = Vec::new();
        let delta = choice.delta.unwrap_or_default();

        if let Some(text) = non_empty(delta.content) {
            fragments.push(DeltaFragment::Text(text));
        }

        for (position, raw) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let (name, arguments) = match raw.function {
                Some(f) => (non_empty(f.name), non_empty(f.arguments)),
                None => (None, None),
            };
            fragments.push(DeltaFragment::ToolCall(ToolCallFragment {
                index: raw.index.unwrap_or(position as u32),
                id: non_empty(raw.id),
                name,
                arguments,
            }));
        }

        Self {
            fragments,
            finish_reason: non_empty(choice.finish_reason),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.finish_reason.is_none()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
