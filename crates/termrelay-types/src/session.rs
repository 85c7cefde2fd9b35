//! Relay session types and state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ConnectionId, UserId};

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

impl Default for Geometry {
    /// The classic 80x24 terminal requested when a PTY is opened.
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Relay session lifecycle.
///
/// `Opening -> Streaming -> Closing -> Closed`, with `Opening -> Closed`
/// when the remote host cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Establishing the remote duplex.
    Opening,
    /// Both pumps are running.
    Streaming,
    /// Tearing down.
    Closing,
    /// Terminal. Nothing is valid after this.
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Opening, Streaming) | (Opening, Closed) | (Streaming, Closing) | (Closing, Closed)
        )
    }
}

/// Opaque identity of the client socket (e.g. a terminal tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry key: one live relay session per (connection, client socket).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
}

impl SessionKey {
    pub fn new(connection_id: ConnectionId, client_id: ClientId) -> Self {
        Self {
            connection_id,
            client_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.client_id)
    }
}

/// Listing view of a live relay session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
    pub user_id: UserId,
    pub target: String,
    pub state: SessionState,
    pub geometry: Geometry,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds of the last input or output frame.
    pub last_activity_at: i64,
}
