//! Completion delta accumulator.
//!
//! Reduces a sequence of [`DeltaEvent`]s into the full assistant text and a
//! set of finished tool calls. Text is forwarded to the caller as it arrives;
//! tool call fragments are buffered per transport index and only parsed once
//! the stream has ended.

use std::collections::BTreeMap;

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};

use super::errors::InferenceError;
use super::types::{DeltaEvent, DeltaFragment, ToolCall, ToolCallFragment};

// ─── Name Policy ─────────────────────────────────────────────────────────────

/// How a `name` fragment is merged into an existing tool call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFragmentPolicy {
    /// Concatenate onto the name received so far, like `arguments`.
    Append,
    /// Replace the stored name whenever a non-empty name arrives.
    ReplaceIfNonEmpty,
}

/// Policy used by [`DeltaAccumulator::new`].
///
/// Transports send the name whole in the first fragment and empty afterwards,
/// so append and replace agree there; append also survives engines that
/// split the name across fragments.
pub const NAME_FRAGMENT_POLICY: NameFragmentPolicy = NameFragmentPolicy::Append;

// ─── Accumulator ─────────────────────────────────────────────────────────────

/// Tool call under construction.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Final output of one streamed completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatedCompletion {
    pub full_text: String,
    /// Ordered by transport index.
    pub tool_calls: Vec<ToolCall>,
}

/// Incremental reducer over delta events.
#[derive(Debug)]
pub struct DeltaAccumulator {
    full_text: String,
    pending: BTreeMap<u32, PendingToolCall>,
    name_policy: NameFragmentPolicy,
}

impl Default for DeltaAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::with_name_policy(NAME_FRAGMENT_POLICY)
    }

    pub fn with_name_policy(name_policy: NameFragmentPolicy) -> Self {
        Self {
            full_text: String::new(),
            pending: BTreeMap::new(),
            name_policy,
        }
    }

    /// Consume one event. Text fragments reach `on_text` before this returns,
    /// in wire order.
    pub fn push<F>(&mut self, event: DeltaEvent, on_text: &mut F)
    where
        F: FnMut(&str) + ?Sized,
    {
        for fragment in event.fragments {
            match fragment {
                DeltaFragment::Text(text) => {
                    self.full_text.push_str(&text);
                    on_text(&text);
                }
                DeltaFragment::ToolCall(fragment) => self.push_tool_fragment(fragment),
            }
        }
    }

    fn push_tool_fragment(&mut self, fragment: ToolCallFragment) {
        let policy = self.name_policy;
        let record = self.pending.entry(fragment.index).or_default();

        if record.id.is_none() {
            record.id = fragment.id;
        }

        if let Some(name) = fragment.name {
            match policy {
                NameFragmentPolicy::Append => record.name.push_str(&name),
                NameFragmentPolicy::ReplaceIfNonEmpty => record.name = name,
            }
        }

        if let Some(arguments) = fragment.arguments {
            record.arguments.push_str(&arguments);
        }
    }

    /// Finalize: parse every argument buffer and assign missing ids.
    ///
    /// A record that never received a name cannot be dispatched and is dropped.
    pub fn finish(self) -> AccumulatedCompletion {
        let tool_calls = self
            .pending
            .into_iter()
            .filter_map(|(index, record)| {
                let name = record.name.trim().to_string();
                if name.is_empty() {
                    tracing::warn!(index, "dropping streamed tool call without a name");
                    return None;
                }
                let arguments = parse_arguments(&name, &record.arguments);
                Some(ToolCall {
                    id: record.id.unwrap_or_else(synthesize_call_id),
                    name,
                    arguments,
                    raw_arguments: record.arguments,
                })
            })
            .collect();

        AccumulatedCompletion {
            full_text: self.full_text,
            tool_calls,
        }
    }
}

/// Drive `stream` to completion through a fresh accumulator.
///
/// A transport error aborts accumulation; partial output is discarded.
pub async fn accumulate<S, F>(
    stream: S,
    on_text: &mut F,
) -> Result<AccumulatedCompletion, InferenceError>
where
    S: Stream<Item = Result<DeltaEvent, InferenceError>>,
    F: FnMut(&str) + ?Sized,
{
    futures::pin_mut!(stream);
    let mut accumulator = DeltaAccumulator::new();

    while let Some(event) = stream.next().await {
        accumulator.push(event?, on_text);
    }

    Ok(accumulator.finish())
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Parse a tool call's raw argument text into an object.
///
/// Empty text means no arguments. Anything that is not a JSON object yields
/// an empty map so that the call can still be executed.
pub fn parse_arguments(tool_name: &str, raw: &str) -> Map<String, Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Map::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(
                tool = %tool_name,
                kind = json_kind(&other),
                "tool arguments are not a JSON object, using empty arguments"
            );
            Map::new()
        }
        Err(e) => {
            tracing::warn!(
                tool = %tool_name,
                error = %e,
                raw_len = raw.len(),
                "failed to parse tool arguments, using empty arguments"
            );
            Map::new()
        }
    }
}

/// Unique id for a tool call the transport did not name.
pub fn synthesize_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
