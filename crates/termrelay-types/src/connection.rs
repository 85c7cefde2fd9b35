//! Stored connection metadata and caller identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a stored connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub i64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller identity produced by token validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
        }
    }
}

/// How the relay authenticates against the remote host.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Plain password.
    Password(String),
    /// PEM/OpenSSH private key.
    Key(String),
}

impl AuthMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::Key(_) => "key",
        }
    }
}

// Secret material must never reach a log line.
impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthMethod::{}(<redacted>)", self.kind())
    }
}

/// A remote host and the credentials to reach it.
///
/// Owned by the credential store. The relay only ever receives one by id
/// lookup and never persists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub id: ConnectionId,
    pub owner: UserId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
}

impl ConnectionDescriptor {
    /// `user@host:port`, as shown in status messages.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Public view of a stored connection (no secrets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_type: String,
}

impl From<&ConnectionDescriptor> for ConnectionSummary {
    fn from(d: &ConnectionDescriptor) -> Self {
        Self {
            id: d.id,
            name: d.name.clone(),
            host: d.host.clone(),
            port: d.port,
            username: d.username.clone(),
            auth_type: d.auth.kind().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            id: ConnectionId(5),
            owner: UserId(1),
            name: "build box".to_string(),
            host: "10.0.0.7".to_string(),
            port: 2222,
            username: "deploy".to_string(),
            auth: AuthMethod::Password("hunter2".to_string()),
        }
    }

    #[test]
    fn test_target_format() {
        assert_eq!(descriptor().target(), "deploy@10.0.0.7:2222");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", descriptor());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("AuthMethod::password(<redacted>)"));
    }

    #[test]
    fn test_summary_has_no_secret() {
        let json = serde_json::to_string(&ConnectionSummary::from(&descriptor())).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains(r#""auth_type":"password""#));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&ConnectionId(5)).unwrap(), "5");
        let identity: Identity = serde_json::from_str(r#"{"user_id":3}"#).unwrap();
        assert_eq!(identity, Identity::new(UserId(3)));
    }
}
