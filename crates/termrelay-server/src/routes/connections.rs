//! Stored connection routes.

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use termrelay_core::{RelayError, RemoteError};
use termrelay_types::{ConnectionId, ConnectionSummary, Geometry};
use tracing::{info, warn};

#[derive(Serialize)]
pub struct ConnectionListResponse {
    pub connections: Vec<ConnectionSummary>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
) -> Json<ConnectionListResponse> {
    Json(ConnectionListResponse {
        connections: state.credentials.list_connections(&identity).await,
    })
}

/// Open the remote duplex and close it straight away.
pub async fn test(
    State(state): State<Arc<AppState>>,
    AuthUser(identity): AuthUser,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let descriptor = state
        .credentials
        .get_connection(ConnectionId(id), &identity)
        .await?;

    let timeout = Duration::from_secs(state.config.connect_timeout_secs);
    let opened = tokio::time::timeout(
        timeout,
        state.connector.open(&descriptor, Geometry::default()),
    )
    .await
    .unwrap_or_else(|_| Err(RemoteError::timed_out(timeout)));

    match opened {
        Ok(duplex) => {
            let (_, input) = duplex.into_parts();
            input.close().await;
            info!(target: "termrelay::api", "Connection test to {} succeeded", descriptor.target());
            Ok(Json(json!({
                "success": true,
                "message": "Connection successful",
            }))
            .into_response())
        }
        Err(e) => {
            warn!(target: "termrelay::api", "Connection test to {} failed: {}", descriptor.target(), e);
            Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": format!("Failed to connect: {}", RelayError::from(e)),
                })),
            )
                .into_response())
        }
    }
}
