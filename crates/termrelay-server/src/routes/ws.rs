//! Terminal WebSocket route.

use crate::auth::bearer_token;
use crate::state::AppState;
use crate::websocket::handle_terminal_socket;
use axum::{
    extract::{Path, Query, State, ws::WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use termrelay_core::AcceptRequest;
use termrelay_types::{ClientId, ConnectionId, Geometry, UserId};

#[derive(Debug, Default, Deserialize)]
pub struct TerminalQuery {
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub client_id: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

impl TerminalQuery {
    /// Build the accept request. The query token wins over the header.
    pub fn into_request(self, connection_id: i64, headers: &HeaderMap) -> AcceptRequest {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .or_else(|| bearer_token(headers))
            .unwrap_or_default();

        AcceptRequest {
            connection_id: ConnectionId(connection_id),
            token,
            claimed_user: self.user_id.map(UserId),
            client_id: self.client_id.filter(|c| !c.is_empty()).map(ClientId::new),
            geometry: match (self.cols, self.rows) {
                (Some(cols), Some(rows)) => Some(Geometry::new(cols, rows)),
                _ => None,
            },
        }
    }
}

/// `GET /ws/ssh/{connection_id}`: authentication happens after the upgrade
/// so that rejections reach the terminal as an `error` frame.
pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<i64>,
    Query(query): Query<TerminalQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let request = query.into_request(connection_id, &headers);
    ws.on_upgrade(move |socket| handle_terminal_socket(socket, state, request))
}
