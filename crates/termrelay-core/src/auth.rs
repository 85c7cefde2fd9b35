//! Identity validation for socket and API callers.

use crate::error::AuthError;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use termrelay_types::{Identity, UserId};
use tracing::debug;

/// Issuer stamped into tokens by the login service.
pub const DEFAULT_ISSUER: &str = "ssh-terminal-app";

/// Default lifetime of an issued token (7 days).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Turns an opaque bearer token into a caller identity.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    exp: i64,
    iat: i64,
    iss: String,
}

/// HS256 JWT validation with a shared secret.
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
}

impl JwtValidator {
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
        }
    }

    /// Sign a token for `identity`, valid for `ttl`.
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: identity.user_id.0,
            email: identity.email.clone(),
            exp: now + ttl.as_secs() as i64,
            iat: now,
            iss: self.issuer.clone(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(target: "termrelay::auth", "Validated token for user {}", data.claims.user_id);
        Ok(Identity {
            user_id: UserId(data.claims.user_id),
            email: data.claims.email,
        })
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        self.verify(token)
    }
}
