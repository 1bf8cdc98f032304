// ABOUTME: HTTP and WebSocket surface - chat, replay, provider management, health.
// ABOUTME: All handlers share AppState; errors go through ApiError.

pub mod chat;
pub mod error;
pub mod providers;

pub use error::{ApiError, ApiResult};

use crate::server::AppState;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat/{project_id}", get(chat::ws_handler))
        .route("/api/chat/{project_id}/messages", get(chat::replay))
        .route(
            "/api/providers",
            get(providers::list_providers).post(providers::create_provider),
        )
        .route(
            "/api/providers/{id}",
            axum::routing::patch(providers::update_provider).delete(providers::delete_provider),
        )
        .route(
            "/api/providers/{id}/models",
            get(providers::list_models).post(providers::add_model),
        )
        .route(
            "/api/providers/{id}/models/{model_id}",
            axum::routing::patch(providers::update_model).delete(providers::delete_model),
        )
        .route("/api/providers/{id}/verify", post(providers::verify_provider))
        .route("/api/models", get(providers::list_all_models))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
