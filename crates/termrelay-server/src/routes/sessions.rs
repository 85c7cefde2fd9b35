//! Live relay session routes.

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use termrelay_types::{ClientId, ConnectionId, Frame, Identity, SessionKey, SessionSummary};
use tracing::info;

#[derive(Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.registry.list_for_user(identity.user_id),
    })
}

/// Resolve a session key, treating other users' sessions as missing.
fn owned_key(
    state: &AppState,
    user: &Identity,
    connection_id: i64,
    client_id: String,
) -> Result<SessionKey, ApiError> {
    let key = SessionKey::new(ConnectionId(connection_id), ClientId::new(client_id));
    match state.registry.get(&key) {
        Some(handle) if handle.user_id() == user.user_id => Ok(key),
        _ => Err(ApiError::not_found("Session not found")),
    }
}

pub async fn terminate(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
    Path((connection_id, client_id)): Path<(i64, String)>,
) -> Result<StatusCode, ApiError> {
    let key = owned_key(&state, &identity, connection_id, client_id)?;
    info!(target: "termrelay::api", "User {} terminating session {}", identity.user_id, key);
    state.registry.terminate(&key).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SendInputRequest {
    pub data: String,
}

pub async fn send_input(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
    Path((connection_id, client_id)): Path<(i64, String)>,
    Json(req): Json<SendInputRequest>,
) -> Result<StatusCode, ApiError> {
    let key = owned_key(&state, &identity, connection_id, client_id)?;
    state.registry.dispatch(&key, Frame::input(req.data)).await?;
    Ok(StatusCode::ACCEPTED)
}
