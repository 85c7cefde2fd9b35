//! Client connection settings.

use crate::error::ClientError;
use crate::reconnect::ReconnectPolicy;
use termrelay_types::Geometry;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the relay, e.g. `ws://localhost:8080`.
    pub server_url: String,
    pub connection_id: i64,
    /// Bearer token. Without one, `connect()` does nothing.
    pub token: Option<String>,
    pub user_id: Option<i64>,
    /// Identifies this terminal to the relay; reconnects reuse it.
    pub client_id: String,
    pub geometry: Option<Geometry>,
    pub reconnect: Option<ReconnectPolicy>,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, connection_id: i64) -> Self {
        Self {
            server_url: server_url.into(),
            connection_id,
            token: None,
            user_id: None,
            client_id: Uuid::new_v4().to_string(),
            geometry: None,
            reconnect: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// `{server}/ws/ssh/{id}?token=..&user_id=..&client_id=..&cols=..&rows=..`
    pub fn socket_url(&self, geometry: Option<Geometry>) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.server_url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        }

        let path = format!(
            "{}/ws/ssh/{}",
            url.path().trim_end_matches('/'),
            self.connection_id
        );
        url.set_path(&path);

        {
            let mut query = url.query_pairs_mut();
            query.clear();
            if let Some(token) = &self.token {
                query.append_pair("token", token);
            }
            if let Some(user_id) = self.user_id {
                query.append_pair("user_id", &user_id.to_string());
            }
            query.append_pair("client_id", &self.client_id);
            if let Some(g) = geometry.or(self.geometry) {
                query.append_pair("cols", &g.cols.to_string());
                query.append_pair("rows", &g.rows.to_string());
            }
        }
        Ok(url)
    }
}
