//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use termrelay_core::{
    JwtValidator, RemoteConnector, RemoteDuplex, RemoteError, StaticCredentialStore,
    StoredConnection,
};
use termrelay_server::config::Config;
use termrelay_server::state::AppState;
use termrelay_types::{ConnectionDescriptor, Geometry, Identity, UserId};
use tokio::io::AsyncWriteExt;

pub const JWT_SECRET: &str = "integration-secret";

/// Prompt written by the echo shell before echoing input back.
pub const PROMPT: &str = "$ ";

/// A remote shell that prints a prompt and echoes every byte it receives.
pub struct EchoConnector;

#[async_trait]
impl RemoteConnector for EchoConnector {
    async fn open(
        &self,
        _descriptor: &ConnectionDescriptor,
        _geometry: Geometry,
    ) -> Result<RemoteDuplex, RemoteError> {
        let (relay_side, shell_side) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(shell_side);
            if writer.write_all(PROMPT.as_bytes()).await.is_ok() {
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            }
        });
        let (reader, writer) = tokio::io::split(relay_side);
        Ok(RemoteDuplex::from_io(reader, writer))
    }
}

/// A remote host that can never be reached.
pub struct UnreachableConnector;

#[async_trait]
impl RemoteConnector for UnreachableConnector {
    async fn open(
        &self,
        _descriptor: &ConnectionDescriptor,
        _geometry: Geometry,
    ) -> Result<RemoteDuplex, RemoteError> {
        Err(RemoteError::Unreachable("no route to host".to_string()))
    }
}

fn stored(id: i64, owner: i64, host: &str) -> StoredConnection {
    StoredConnection {
        id,
        owner,
        name: format!("server-{}", id),
        host: host.to_string(),
        port: 22,
        username: "deploy".to_string(),
        auth_type: "password".to_string(),
        password: Some("hunter2".to_string()),
        private_key: None,
    }
}

/// Connection 5 belongs to user 1, connection 6 to user 2.
pub fn test_config() -> Config {
    Config {
        jwt_secret: JWT_SECRET.to_string(),
        connect_timeout_secs: 2,
        shutdown_grace_secs: 2,
        connections: vec![stored(5, 1, "10.0.0.5"), stored(6, 2, "10.0.0.6")],
        ..Config::default()
    }
}

pub fn test_state(connector: Arc<dyn RemoteConnector>) -> Arc<AppState> {
    let config = test_config();
    let validator = Arc::new(JwtValidator::new(
        config.jwt_secret.as_bytes(),
        config.jwt_issuer.clone(),
    ));
    let credentials = Arc::new(
        StaticCredentialStore::new(config.connections.clone(), None)
            .expect("test connections are valid"),
    );
    Arc::new(AppState::with_collaborators(
        config,
        validator,
        credentials,
        connector,
    ))
}

pub fn echo_state() -> Arc<AppState> {
    test_state(Arc::new(EchoConnector))
}

/// A valid token for `user_id`.
pub fn token_for(user_id: i64) -> String {
    let config = test_config();
    JwtValidator::new(config.jwt_secret.as_bytes(), config.jwt_issuer)
        .issue(&Identity::new(UserId(user_id)), Duration::from_secs(3600))
        .expect("token issues")
}
