//! Completion endpoint error types.
//!
//! Every variant carries enough context to build a log line. Whether an error
//! is shown to the user or masked is decided by the orchestrator, not here.

use thiserror::Error;

/// Errors raised while talking to the completion endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the completion endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// Non-2xx HTTP response from the completion endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// SSE framing or chunk-level error while reading a streamed response.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// A buffered response body did not match the chat completions shape.
    #[error("malformed completion response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// The endpoint is not configured for live requests.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// HTTP status code, if the endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}
