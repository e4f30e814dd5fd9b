//! Completion endpoint plumbing.
//!
//! This module handles all communication with the language-model endpoint:
//! - Buffered and streamed chat completions (OpenAI-compatible API)
//! - SSE framing and validation of streamed deltas
//! - Reduction of deltas into text plus finished tool calls
//! - Endpoint configuration and mock-mode detection
//!
//! The endpoint is reached through the [`CompletionProvider`] trait so the
//! orchestrator never depends on a concrete HTTP client.

pub mod accumulator;
pub mod client;
pub mod config;
pub mod errors;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use accumulator::{AccumulatedCompletion, DeltaAccumulator, NameFragmentPolicy};
pub use client::{CompletionProvider, DeltaStream, InferenceClient};
pub use config::CompletionConfig;
pub use errors::InferenceError;
pub use types::{ChatCompletionRequest, ChatMessage, DeltaEvent, Role, ToolCall, ToolDefinition};
