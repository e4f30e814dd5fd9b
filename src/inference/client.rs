//! OpenAI-compatible completion client.
//!
//! Sends chat completion requests to the configured endpoint, either buffered
//! or as an SSE stream of validated delta events. Retries and fallbacks are
//! not attempted here: a failed first request is surfaced to the orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client as HttpClient;

use super::config::LiveEndpoint;
use super::errors::InferenceError;
use super::streaming::{parse_non_streaming_response, parse_sse_stream};
use super::types::{ChatCompletionRequest, CompletionMessage, DeltaEvent};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout. Total request duration is left unbounded; a slow
/// upstream is the HTTP caller's to cut off.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stream of validated deltas from one streamed completion.
pub type DeltaStream = BoxStream<'static, Result<DeltaEvent, InferenceError>>;

// ─── Provider Seam ───────────────────────────────────────────────────────────

/// Anything that can answer chat completion requests.
///
/// The live [`InferenceClient`] is the production implementation; the
/// orchestrator only depends on this trait.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Buffered completion.
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<CompletionMessage, InferenceError>;

    /// Streamed completion. Errors before the first byte are returned
    /// directly; errors mid-stream arrive as stream items.
    async fn complete_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<DeltaStream, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for a live OpenAI-compatible chat completions endpoint.
pub struct InferenceClient {
    http: HttpClient,
    endpoint: LiveEndpoint,
}

impl InferenceClient {
    pub fn new(endpoint: LiveEndpoint) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: endpoint.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, endpoint })
    }

    pub fn base_url(&self) -> &str {
        &self.endpoint.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.base_url)
    }

    /// POST the request and check the status line.
    async fn send(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = self.completions_url();

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tool_count(),
            stream = body.stream,
            "=== COMPLETION REQUEST ==="
        );

        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(body);
        if body.stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request
            .send()
            .await
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                url = %url,
                status = status.as_u16(),
                body_len = body_text.len(),
                "completion endpoint returned an error status"
            );
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for InferenceClient {
    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<CompletionMessage, InferenceError> {
        let mut body = request.clone();
        body.stream = false;

        let response = self.send(&body).await?;
        let text = response.text().await.map_err(|e| InferenceError::StreamError {
            reason: format!("failed to read response body: {e}"),
        })?;

        parse_non_streaming_response(&text)
    }

    async fn complete_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<DeltaStream, InferenceError> {
        let mut body = request.clone();
        body.stream = true;

        let response = self.send(&body).await?;
        Ok(parse_sse_stream(response.bytes_stream()).boxed())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::{ChatMessage, DeltaFragment, ToolDefinition};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> InferenceClient {
        InferenceClient::new(LiveEndpoint {
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
        })
        .unwrap()
    }

    fn request(stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-test".into(),
            messages: vec![ChatMessage::user("hello")],
            tools: Some(vec![ToolDefinition::function(
                "get_weather",
                "weather",
                serde_json::json!({"type": "object"}),
            )]),
            tool_choice: Some("auto".into()),
            max_completion_tokens: Some(16_000),
            stream,
        }
    }

    #[tokio::test]
    async fn test_buffered_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"stream": false, "tool_choice": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"choices":[{"message":{"content":"Sunny."}}]}"#,
                "application/json",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&format!("{}/v1", server.uri()));
        let msg = client.complete(&request(true)).await.unwrap();
        assert_eq!(msg.content.as_deref(), Some("Sunny."));
    }

    #[tokio::test]
    async fn test_streamed_completion() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",",
            "\"function\":{\"name\":\"get_weather\",\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let client = client(&format!("{}/v1", server.uri()));
        let events: Vec<_> = client
            .complete_stream(&request(false))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap().fragments,
            vec![DeltaFragment::Text("Hi".into())]
        );
        assert!(matches!(
            events[1].as_ref().unwrap().fragments[0],
            DeltaFragment::ToolCall(_)
        ));
    }

    #[tokio::test]
    async fn test_error_status_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let client = client(&server.uri());
        match client.complete_stream(&request(true)).await {
            Err(InferenceError::HttpError { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            Err(other) => panic!("expected HttpError, got {other:?}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_failure() {
        let client = client("http://127.0.0.1:1/v1");
        let err = client.complete(&request(false)).await.unwrap_err();
        assert!(matches!(err, InferenceError::ConnectionFailed { .. }));
    }
}
