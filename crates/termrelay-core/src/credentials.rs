//! Connection descriptor lookup.
//!
//! The relay never stores credentials itself. It asks a [`CredentialStore`]
//! for the descriptor of a connection id on behalf of a caller. The
//! [`StaticCredentialStore`] serves descriptors declared in configuration,
//! with secrets optionally encrypted at rest.

use crate::error::{LookupError, RelayError};
use crate::secret::SecretCipher;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use termrelay_types::{
    AuthMethod, ConnectionDescriptor, ConnectionId, ConnectionSummary, Identity, UserId,
};
use tracing::warn;

/// Looks up connection descriptors by id for a given caller.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the descriptor, enforcing that `caller` owns it.
    async fn get_connection(
        &self,
        id: ConnectionId,
        caller: &Identity,
    ) -> Result<ConnectionDescriptor, LookupError>;

    /// Connections owned by `caller`, without secrets.
    async fn list_connections(&self, caller: &Identity) -> Vec<ConnectionSummary>;
}

/// A connection entry as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConnection {
    pub id: i64,
    pub owner: i64,
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_auth_type() -> String {
    "password".to_string()
}

impl StoredConnection {
    /// Same rules the connection form enforces: a known auth type with its secret present.
    fn validate(&self) -> Result<(), RelayError> {
        match self.auth_type.as_str() {
            "password" if self.password.as_deref().unwrap_or("").is_empty() => Err(
                RelayError::Credentials(format!(
                    "connection {}: password is required for password authentication",
                    self.id
                )),
            ),
            "key" if self.private_key.as_deref().unwrap_or("").is_empty() => Err(
                RelayError::Credentials(format!(
                    "connection {}: private key is required for key authentication",
                    self.id
                )),
            ),
            "password" | "key" => Ok(()),
            other => Err(RelayError::Credentials(format!(
                "connection {}: invalid auth_type '{}', must be 'password' or 'key'",
                self.id, other
            ))),
        }
    }

    fn to_descriptor(&self, cipher: Option<&SecretCipher>) -> Result<ConnectionDescriptor, LookupError> {
        let reveal = |stored: &Option<String>| {
            SecretCipher::reveal(cipher, stored.as_deref().unwrap_or("")).map_err(|e| {
                warn!(target: "termrelay::credentials", "Failed to decrypt secret for connection {}: {}", self.id, e);
                LookupError::Unavailable(e.to_string())
            })
        };

        let auth = if self.auth_type == "key" {
            AuthMethod::Key(reveal(&self.private_key)?)
        } else {
            AuthMethod::Password(reveal(&self.password)?)
        };

        Ok(ConnectionDescriptor {
            id: ConnectionId(self.id),
            owner: UserId(self.owner),
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth,
        })
    }

    fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: ConnectionId(self.id),
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth_type: self.auth_type.clone(),
        }
    }
}

/// In-memory store built from configured entries.
#[derive(Debug)]
pub struct StaticCredentialStore {
    connections: HashMap<ConnectionId, StoredConnection>,
    cipher: Option<SecretCipher>,
}

impl StaticCredentialStore {
    pub fn new(
        entries: Vec<StoredConnection>,
        cipher: Option<SecretCipher>,
    ) -> Result<Self, RelayError> {
        let mut connections = HashMap::with_capacity(entries.len());
        for entry in entries {
            entry.validate()?;
            let id = ConnectionId(entry.id);
            if connections.insert(id, entry).is_some() {
                return Err(RelayError::Credentials(format!(
                    "duplicate connection id {}",
                    id
                )));
            }
        }
        Ok(Self {
            connections,
            cipher,
        })
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get_connection(
        &self,
        id: ConnectionId,
        caller: &Identity,
    ) -> Result<ConnectionDescriptor, LookupError> {
        let entry = self.connections.get(&id).ok_or(LookupError::NotFound)?;
        if UserId(entry.owner) != caller.user_id {
            return Err(LookupError::NotOwner);
        }
        entry.to_descriptor(self.cipher.as_ref())
    }

    async fn list_connections(&self, caller: &Identity) -> Vec<ConnectionSummary> {
        let mut owned: Vec<_> = self
            .connections
            .values()
            .filter(|c| UserId(c.owner) == caller.user_id)
            .map(StoredConnection::summary)
            .collect();
        owned.sort_by_key(|c| c.id);
        owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::ENCRYPTED_PREFIX;

    fn entry(id: i64, owner: i64) -> StoredConnection {
        StoredConnection {
            id,
            owner,
            name: format!("host {}", id),
            host: "10.0.0.1".to_string(),
            port: 22,
            username: "root".to_string(),
            auth_type: "password".to_string(),
            password: Some("pw".to_string()),
            private_key: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_enforces_ownership() {
        let store = StaticCredentialStore::new(vec![entry(5, 1), entry(6, 2)], None).unwrap();
        let alice = Identity::new(UserId(1));

        let d = store.get_connection(ConnectionId(5), &alice).await.unwrap();
        assert_eq!(d.auth, AuthMethod::Password("pw".to_string()));
        assert_eq!(d.target(), "root@10.0.0.1:22");

        assert_eq!(
            store.get_connection(ConnectionId(6), &alice).await,
            Err(LookupError::NotOwner)
        );
        assert_eq!(
            store.get_connection(ConnectionId(99), &alice).await,
            Err(LookupError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_encrypted_secret_is_revealed() {
        let cipher = SecretCipher::from_key("k").unwrap();
        let mut e = entry(5, 1);
        e.auth_type = "key".to_string();
        e.password = None;
        e.private_key = Some(format!("{}{}", ENCRYPTED_PREFIX, cipher.encrypt("PEM").unwrap()));

        let store = StaticCredentialStore::new(vec![e], Some(cipher)).unwrap();
        let d = store
            .get_connection(ConnectionId(5), &Identity::new(UserId(1)))
            .await
            .unwrap();
        assert_eq!(d.auth, AuthMethod::Key("PEM".to_string()));
    }

    #[tokio::test]
    async fn test_encrypted_secret_without_key_is_unavailable() {
        let mut e = entry(5, 1);
        e.password = Some(format!("{}AAAA", ENCRYPTED_PREFIX));
        let store = StaticCredentialStore::new(vec![e], None).unwrap();
        assert!(matches!(
            store.get_connection(ConnectionId(5), &Identity::new(UserId(1))).await,
            Err(LookupError::Unavailable(_))
        ));
    }

    #[test]
    fn test_entry_validation() {
        let mut missing_pw = entry(1, 1);
        missing_pw.password = None;
        assert!(StaticCredentialStore::new(vec![missing_pw], None).is_err());

        let mut bad_type = entry(1, 1);
        bad_type.auth_type = "kerberos".to_string();
        assert!(StaticCredentialStore::new(vec![bad_type], None).is_err());

        assert!(StaticCredentialStore::new(vec![entry(1, 1), entry(1, 2)], None).is_err());
    }

    #[tokio::test]
    async fn test_list_only_owned() {
        let store =
            StaticCredentialStore::new(vec![entry(6, 1), entry(5, 1), entry(7, 2)], None).unwrap();
        let listed = store.list_connections(&Identity::new(UserId(1))).await;
        let ids: Vec<_> = listed.iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![5, 6]);
    }

    #[test]
    fn test_entry_defaults() {
        let e: StoredConnection =
            serde_json::from_str(r#"{"id":1,"owner":1,"host":"h","username":"u","password":"p"}"#)
                .unwrap();
        assert_eq!(e.port, 22);
        assert_eq!(e.auth_type, "password");
    }
}
