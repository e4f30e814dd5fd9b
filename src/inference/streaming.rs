//! SSE framing and response parsing for OpenAI-compatible chat completions.
//!
//! The streamed body is split on blank-line event boundaries (`\n\n` or
//! `\r\n\r\n`), each `data:` payload is parsed as a chunk and converted into a
//! validated [`DeltaEvent`]. Accumulation happens downstream in
//! [`super::accumulator`].

use std::fmt::Display;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use super::accumulator::{parse_arguments, synthesize_call_id};
use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, CompletionMessage, DeltaEvent, ToolCall};

// ─── SSE Stream ──────────────────────────────────────────────────────────────

/// Turn a raw response body stream into validated delta events.
///
/// Keep-alive comments and events without content are skipped. The stream
/// ends at `[DONE]` or when the body ends, whichever comes first.
pub fn parse_sse_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<DeltaEvent, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = SseState {
        body: Box::pin(byte_stream),
        buffer: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            if let Some((event, consumed)) = next_event(&state.buffer) {
                state.buffer.drain(..consumed);
                match process_event(&event) {
                    EventOutcome::Delta(delta) => return Some((Ok(delta), state)),
                    EventOutcome::Done => {
                        state.done = true;
                        return None;
                    }
                    EventOutcome::Skip => continue,
                    EventOutcome::Error(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }

            match state.body.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((
                        Err(InferenceError::StreamError {
                            reason: format!("stream read error: {e}"),
                        }),
                        state,
                    ));
                }
                None => {
                    // Body ended without a trailing blank line.
                    state.done = true;
                    let rest = String::from_utf8_lossy(&state.buffer).trim().to_string();
                    state.buffer.clear();
                    if rest.is_empty() {
                        return None;
                    }
                    return match process_event(&rest) {
                        EventOutcome::Delta(delta) => Some((Ok(delta), state)),
                        EventOutcome::Error(e) => Some((Err(e), state)),
                        EventOutcome::Done | EventOutcome::Skip => None,
                    };
                }
            }
        }
    })
}

struct SseState<S> {
    body: std::pin::Pin<Box<S>>,
    /// Raw bytes; decoding waits for a full event so multi-byte characters
    /// split across network frames survive.
    buffer: Vec<u8>,
    done: bool,
}

enum EventOutcome {
    Delta(DeltaEvent),
    Done,
    Skip,
    Error(InferenceError),
}

/// Find the first complete event. Returns its text and the bytes consumed.
fn next_event(buffer: &[u8]) -> Option<(String, usize)> {
    let lf = find(buffer, b"\n\n").map(|i| (i, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|i| (i, 4));
    let (end, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let event = String::from_utf8_lossy(&buffer[..end]).into_owned();
    Some((event, end + sep))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse one SSE event (possibly several `data:` lines).
fn process_event(event: &str) -> EventOutcome {
    let mut data = String::new();

    for line in event.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.trim();
            if payload == "[DONE]" {
                return EventOutcome::Done;
            }
            data.push_str(payload);
        }
    }

    if data.is_empty() {
        return EventOutcome::Skip;
    }

    let value: Value = match serde_json::from_str(&data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, data_len = data.len(), "skipping unparseable SSE event");
            return EventOutcome::Skip;
        }
    };

    if let Some(err) = value.get("error") {
        let reason = err
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| err.to_string());
        return EventOutcome::Error(InferenceError::StreamError { reason });
    }

    match serde_json::from_value::<ChatCompletionChunk>(value) {
        Ok(chunk) => {
            let delta = DeltaEvent::from_chunk(chunk);
            if delta.is_empty() {
                EventOutcome::Skip
            } else {
                EventOutcome::Delta(delta)
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "skipping SSE event with unexpected shape");
            EventOutcome::Skip
        }
    }
}

// ─── Buffered Response ───────────────────────────────────────────────────────

/// Parse a non-streaming response body into text and tool calls.
///
/// Tool call arguments follow the same rules as streamed ones: anything that
/// is not a JSON object becomes an empty argument map.
pub fn parse_non_streaming_response(body: &str) -> Result<CompletionMessage, InferenceError> {
    #[derive(Deserialize)]
    struct Response {
        #[serde(default)]
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: Message,
    }

    #[derive(Deserialize)]
    struct Message {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        tool_calls: Option<Vec<RawToolCall>>,
    }

    #[derive(Deserialize)]
    struct RawToolCall {
        #[serde(default)]
        id: Option<String>,
        function: RawFunction,
    }

    #[derive(Deserialize)]
    struct RawFunction {
        name: String,
        #[serde(default)]
        arguments: Option<Value>,
    }

    let resp: Response =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter(|tc| !tc.function.name.trim().is_empty())
        .map(|tc| {
            // Some gateways send arguments as an object instead of a string.
            let raw_arguments = match tc.function.arguments {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            let name = tc.function.name.trim().to_string();
            ToolCall {
                id: tc.id.filter(|id| !id.is_empty()).unwrap_or_else(synthesize_call_id),
                arguments: parse_arguments(&name, &raw_arguments),
                name,
                raw_arguments,
            }
        })
        .collect();

    Ok(CompletionMessage {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
