//! WebSocket connection handling.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use termrelay_core::{AcceptRequest, ClientSocket, Inbound, Outbound};
use tracing::{debug, info};

/// Adapt an axum WebSocket to the relay's socket abstraction. Pings are
/// answered by axum and never reach the relay.
pub fn client_socket(socket: WebSocket) -> ClientSocket {
    let (ws_tx, ws_rx) = socket.split();

    let sink = ws_tx.with(|out: Outbound| async move {
        Ok::<_, axum::Error>(match out {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Close => Message::Close(None),
        })
    });

    let stream = ws_rx.filter_map(|msg| async move {
        match msg {
            Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.as_str().to_owned()))),
            Ok(Message::Binary(bytes)) => Some(Ok(Inbound::Binary(bytes.to_vec()))),
            Ok(Message::Close(_)) => Some(Ok(Inbound::Close)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => Some(Err(e)),
        }
    });

    ClientSocket::new(sink, stream)
}

/// Hand an upgraded terminal socket to the registry. The session task owns
/// the socket from here on.
pub async fn handle_terminal_socket(socket: WebSocket, state: Arc<AppState>, request: AcceptRequest) {
    let connection_id = request.connection_id;
    debug!(target: "termrelay::ws", "Terminal socket opened for connection {}", connection_id);

    match state.registry.accept(request, client_socket(socket)).await {
        Ok(handle) => {
            info!(target: "termrelay::ws", "Terminal socket attached to session {}", handle.key());
        }
        Err(reason) => {
            info!(
                target: "termrelay::ws",
                "Terminal socket for connection {} rejected: {}",
                connection_id,
                reason
            );
        }
    }
}
