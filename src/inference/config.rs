//! Completion endpoint configuration.
//!
//! Decides whether the relay talks to a live OpenAI-compatible endpoint or
//! serves synthetic responses locally. The endpoint is treated as absent when
//! either the URL or the credential is blank or looks like a placeholder left
//! over from a template.

use std::time::Duration;

use serde::Deserialize;

/// Model used when neither the session nor the configuration names one.
pub const DEFAULT_MODEL: &str = "google-ai-studio/gemini-2.5-flash";

/// Upper bound on generated tokens per completion request.
pub const DEFAULT_MAX_TOKENS: u32 = 16_000;

/// Delay between synthetic stream units in mock mode.
pub const DEFAULT_MOCK_CHUNK_DELAY_MS: u64 = 30;

/// Substrings that mark a credential or URL as a template placeholder.
const PLACEHOLDER_MARKERS: &[&str] = &[
    "your-",
    "your_",
    "placeholder",
    "changeme",
    "change-me",
    "xxx",
    "example.com",
    "${",
    "<",
    ">",
];

/// `completion:` section of the relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of the OpenAI-compatible API (`…/v1`), without the
    /// `/chat/completions` suffix.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_mock_chunk_delay_ms")]
    pub mock_chunk_delay_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            default_model: default_model(),
            max_tokens: DEFAULT_MAX_TOKENS,
            mock_chunk_delay_ms: DEFAULT_MOCK_CHUNK_DELAY_MS,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_mock_chunk_delay_ms() -> u64 {
    DEFAULT_MOCK_CHUNK_DELAY_MS
}

/// Resolved live endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEndpoint {
    pub base_url: String,
    pub api_key: String,
}

impl CompletionConfig {
    /// The live endpoint, or `None` when the relay must run in mock mode.
    pub fn live_endpoint(&self) -> Option<LiveEndpoint> {
        let base_url = usable(self.base_url.as_deref())?;
        let api_key = usable(self.api_key.as_deref())?;
        Some(LiveEndpoint {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn is_mock(&self) -> bool {
        self.live_endpoint().is_none()
    }

    pub fn mock_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.mock_chunk_delay_ms)
    }
}

fn usable(value: Option<&str>) -> Option<&str> {
    let value = value?.trim();
    if is_placeholder(value) {
        None
    } else {
        Some(value)
    }
}

/// Whether a configured value is blank or a recognisable placeholder.
pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
}
