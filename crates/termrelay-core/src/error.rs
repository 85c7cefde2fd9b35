//! Error types for termrelay.

use std::time::Duration;
use termrelay_types::DecodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Authentication rejected")]
    AuthRejected,

    #[error("Connection belongs to another user")]
    NotOwner,

    #[error("Connection not found")]
    NotFound,

    #[error("Remote host unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Remote authentication failed: {0}")]
    RemoteAuthFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Credential store error: {0}")]
    Credentials(String),
}

/// Why the remote duplex could not be opened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{0}")]
    Unreachable(String),

    #[error("{0}")]
    AuthFailed(String),
}

impl RemoteError {
    pub fn timed_out(after: Duration) -> Self {
        RemoteError::Unreachable(format!("connection timed out after {}s", after.as_secs()))
    }
}

impl From<RemoteError> for RelayError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Unreachable(msg) => RelayError::RemoteUnreachable(msg),
            RemoteError::AuthFailed(msg) => RelayError::RemoteAuthFailed(msg),
        }
    }
}

/// Credential store lookup failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("connection not found")]
    NotFound,

    #[error("connection belongs to another user")]
    NotOwner,

    #[error("stored credentials unavailable: {0}")]
    Unavailable(String),
}

/// Token validation failures.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid or expired token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token required")]
    MissingToken,
}

/// Secret encryption/decryption failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("encryption key is empty")]
    EmptyKey,

    #[error("ciphertext is not valid base64")]
    Encoding,

    #[error("ciphertext too short")]
    Truncated,

    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,

    #[error("decrypted secret is not UTF-8")]
    Utf8,
}

/// Why an accept attempt was refused. No session exists after a rejection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("Unauthorized")]
    Unauthenticated,

    #[error("Connection belongs to another user")]
    NotOwner,

    #[error("Connection not found")]
    NotFound,

    #[error("Stored credentials are unavailable")]
    Unavailable,

    #[error("Server is shutting down")]
    ShuttingDown,
}

impl From<LookupError> for RejectReason {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::NotFound => RejectReason::NotFound,
            LookupError::NotOwner => RejectReason::NotOwner,
            LookupError::Unavailable(_) => RejectReason::Unavailable,
        }
    }
}

impl From<RejectReason> for RelayError {
    fn from(r: RejectReason) -> Self {
        match r {
            RejectReason::Unauthenticated => RelayError::AuthRejected,
            RejectReason::NotOwner => RelayError::NotOwner,
            RejectReason::NotFound => RelayError::NotFound,
            RejectReason::Unavailable => {
                RelayError::Credentials("stored credentials are unavailable".to_string())
            }
            RejectReason::ShuttingDown => {
                RelayError::ProtocolMisuse("server is shutting down".to_string())
            }
        }
    }
}

impl From<LookupError> for RelayError {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::NotFound => RelayError::NotFound,
            LookupError::NotOwner => RelayError::NotOwner,
            LookupError::Unavailable(msg) => RelayError::Credentials(msg),
        }
    }
}
