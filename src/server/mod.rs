//! HTTP surface.
//!
//! An axum router over the per-session agents: health and tool catalog under
//! `/api`, session operations under `/api/chat/{session_id}/...`.

mod error;
mod routes;
mod state;
mod stream;

pub use error::{ApiError, ServerError};
pub use state::AppState;

use std::net::SocketAddr;

use axum::http::Method;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/tools", get(routes::list_tools))
        .route("/api/chat/{session_id}/messages", get(routes::get_messages))
        .route("/api/chat/{session_id}/chat", post(routes::post_chat))
        .route("/api/chat/{session_id}/model", post(routes::post_model))
        .route("/api/chat/{session_id}/system-prompt", post(routes::post_system_prompt))
        .route("/api/chat/{session_id}/tools", post(routes::post_tools))
        .route("/api/chat/{session_id}/clear", delete(routes::delete_clear))
        .fallback(routes::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!(%addr, "HTTP server ready to accept connections");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
