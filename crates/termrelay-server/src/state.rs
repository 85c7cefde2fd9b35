//! Shared application state.

use crate::config::Config;
use std::sync::Arc;
use termrelay_core::{
    CredentialStore, JwtValidator, RemoteConnector, SecretCipher, SessionRegistry,
    SshPtyConnector, StaticCredentialStore, TokenValidator,
};

/// Shared application state.
pub struct AppState {
    pub registry: SessionRegistry,
    pub validator: Arc<dyn TokenValidator>,
    pub credentials: Arc<dyn CredentialStore>,
    pub connector: Arc<dyn RemoteConnector>,
    pub config: Config,
}

impl AppState {
    /// Build the production collaborators from configuration.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let validator = Arc::new(JwtValidator::new(
            config.jwt_secret.as_bytes(),
            config.jwt_issuer.clone(),
        ));
        let cipher = config
            .encryption_key
            .as_deref()
            .map(SecretCipher::from_key)
            .transpose()?;
        let credentials = Arc::new(StaticCredentialStore::new(
            config.connections.clone(),
            cipher,
        )?);
        let connector = Arc::new(SshPtyConnector::new(config.ssh_config()));

        Ok(Self::with_collaborators(
            config,
            validator,
            credentials,
            connector,
        ))
    }

    pub fn with_collaborators(
        config: Config,
        validator: Arc<dyn TokenValidator>,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn RemoteConnector>,
    ) -> Self {
        let registry = SessionRegistry::new(
            validator.clone(),
            credentials.clone(),
            connector.clone(),
            config.registry_config(),
        );
        Self {
            registry,
            validator,
            credentials,
            connector,
            config,
        }
    }
}
