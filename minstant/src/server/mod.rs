//! HTTP surface.
//!
//! Endpoints:
//! - GET / - Health check
//! - POST /chat - Submit a turn; the reply streams back as server-sent events
//!
//! Identity is taken from the `X-User-Id` header, set by the authentication
//! gateway in front of this service.

mod chat;
mod error;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bridge::TurnPool;

pub use chat::{DONE_EVENT, ERROR_EVENT, USER_ID_HEADER};
pub use error::ApiError;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub turns: Arc<TurnPool>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health))
        .route("/chat", post(chat::chat))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves, then finish in-flight responses.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("server stopped");
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "message": "Hello, World!" }))
}
