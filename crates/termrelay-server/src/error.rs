//! HTTP error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use termrelay_core::{LookupError, RelayError};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// An error rendered as `{"error": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<LookupError> for ApiError {
    fn from(e: LookupError) -> Self {
        match e {
            // Someone else's connection is reported as missing.
            LookupError::NotFound | LookupError::NotOwner => {
                ApiError::not_found("Connection not found")
            }
            LookupError::Unavailable(msg) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        let status = match &e {
            RelayError::AuthRejected => StatusCode::UNAUTHORIZED,
            RelayError::NotOwner | RelayError::NotFound | RelayError::ProtocolMisuse(_) => {
                StatusCode::NOT_FOUND
            }
            RelayError::RemoteUnreachable(_) | RelayError::RemoteAuthFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::Decode(_) => StatusCode::BAD_REQUEST,
            RelayError::Io(_) | RelayError::Secret(_) | RelayError::Credentials(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, e.to_string())
    }
}
