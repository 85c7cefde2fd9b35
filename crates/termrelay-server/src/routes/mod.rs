//! HTTP route handlers.

pub mod connections;
pub mod sessions;
pub mod ws;

use crate::state::AppState;
use axum::{
    Json, Router,
    routing::{delete, get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// The full HTTP surface.
pub fn router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/sessions", get(sessions::list))
        .route(
            "/sessions/{connection_id}/{client_id}",
            delete(sessions::terminate),
        )
        .route(
            "/sessions/{connection_id}/{client_id}/input",
            post(sessions::send_input),
        )
        .route("/connections", get(connections::list))
        .route("/connections/{id}/test", post(connections::test));

    let ws_routes = Router::new().route("/ssh/{connection_id}", get(ws::upgrade));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
