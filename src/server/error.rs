//! HTTP error envelope.
//!
//! Every failure leaves the server as `{"success": false, "error": ..,
//! "detail"?: ..}` with a matching status code.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::agent_core::AgentError;

/// Failures that stop the listener itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub const MALFORMED_JSON: &str = "Malformed JSON payload";
pub const INVALID_FIELDS: &str = "Missing or invalid fields";
pub const NOT_FOUND: &str = "Not found";
pub const PROCESSING_ERROR: &str = "Failed to process message";
pub const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub detail: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, NOT_FOUND)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: &self.error,
            detail: self.detail.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// `Json` extractor whose rejection is rendered as an [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let error = match &rejection {
            JsonRejection::JsonDataError(_) => INVALID_FIELDS,
            _ => MALFORMED_JSON,
        };
        tracing::debug!(reason = %rejection.body_text(), "rejected request body");
        ApiError::bad_request(error).with_detail(rejection.body_text())
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        match &e {
            AgentError::InvalidInput { reason } => ApiError::bad_request(reason.clone()),
            AgentError::Completion(inner) => {
                ApiError::new(StatusCode::BAD_GATEWAY, PROCESSING_ERROR).with_detail(inner.to_string())
            }
            _ => {
                tracing::error!(error = %e, "request failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
                    .with_detail(e.to_string())
            }
        }
    }
}
