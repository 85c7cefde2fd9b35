//! Process-wide table of live relay sessions.
//!
//! Entries live in a [`DashMap`] keyed by [`SessionKey`]; its critical
//! sections are short and synchronous. Accepts for the same key are
//! serialized by a per-key async lock so that a superseded session is fully
//! closed before its replacement starts opening.

use crate::auth::TokenValidator;
use crate::credentials::CredentialStore;
use crate::error::{RejectReason, RelayError};
use crate::relay::{RelaySession, SessionHandle};
use crate::remote::RemoteConnector;
use crate::socket::ClientSocket;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use termrelay_types::{
    ClientId, ConnectionDescriptor, ConnectionId, Frame, Geometry, Identity, SessionKey,
    SessionSummary, UserId,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Bound on opening the remote duplex.
    pub connect_timeout: Duration,
    /// How long [`SessionRegistry::shutdown`] waits for sessions to close.
    pub shutdown_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// One socket asking to be bridged to a stored connection.
#[derive(Debug, Clone)]
pub struct AcceptRequest {
    pub connection_id: ConnectionId,
    pub token: String,
    /// User id the client claims to be. Must match the token when present.
    pub claimed_user: Option<UserId>,
    /// Identity of the client socket. A fresh one is generated when absent.
    pub client_id: Option<ClientId>,
    pub geometry: Option<Geometry>,
}

impl AcceptRequest {
    pub fn new(connection_id: ConnectionId, token: impl Into<String>) -> Self {
        Self {
            connection_id,
            token: token.into(),
            claimed_user: None,
            client_id: None,
            geometry: None,
        }
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_claimed_user(mut self, user: UserId) -> Self {
        self.claimed_user = Some(user);
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

struct RegistryInner {
    validator: Arc<dyn TokenValidator>,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn RemoteConnector>,
    config: RegistryConfig,
    sessions: DashMap<SessionKey, SessionHandle>,
    key_locks: DashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

/// Shared handle to the session table.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn RemoteConnector>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                validator,
                credentials,
                connector,
                config,
                sessions: DashMap::new(),
                key_locks: DashMap::new(),
                next_id: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Validate the caller, look up the connection and start a relay session
    /// on `socket`. On rejection the socket receives one `error` frame and is
    /// closed, and no session exists afterwards.
    pub async fn accept(
        &self,
        request: AcceptRequest,
        socket: ClientSocket,
    ) -> Result<SessionHandle, RejectReason> {
        let descriptor = match self.authorize(&request).await {
            Ok(descriptor) => descriptor,
            Err(reason) => {
                info!(
                    target: "termrelay::registry",
                    "Rejected connection {}: {}",
                    request.connection_id,
                    reason
                );
                socket.reject(&Frame::error(reason.to_string())).await;
                return Err(reason);
            }
        };

        let client_id = request
            .client_id
            .unwrap_or_else(|| ClientId::new(Uuid::new_v4().to_string()));
        let key = SessionKey::new(request.connection_id, client_id);
        let geometry = request
            .geometry
            .filter(Geometry::is_valid)
            .unwrap_or_default();

        let lock = self
            .inner
            .key_locks
            .entry(key.clone())
            .or_default()
            .clone();
        let guard = lock.lock().await;

        let accepted = self.install(key.clone(), descriptor, geometry, socket).await;

        drop(guard);
        drop(lock);
        self.inner
            .key_locks
            .remove_if(&key, |_, l| Arc::strong_count(l) == 1);

        accepted
    }

    async fn authorize(&self, request: &AcceptRequest) -> Result<ConnectionDescriptor, RejectReason> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(RejectReason::ShuttingDown);
        }

        let identity: Identity = self
            .inner
            .validator
            .validate(&request.token)
            .await
            .map_err(|e| {
                debug!(target: "termrelay::registry", "Token rejected: {}", e);
                RejectReason::Unauthenticated
            })?;

        if let Some(claimed) = request.claimed_user {
            if claimed != identity.user_id {
                warn!(
                    target: "termrelay::registry",
                    "Claimed user {} does not match token user {}",
                    claimed,
                    identity.user_id
                );
                return Err(RejectReason::Unauthenticated);
            }
        }

        Ok(self
            .inner
            .credentials
            .get_connection(request.connection_id, &identity)
            .await?)
    }

    /// Runs under the key lock.
    async fn install(
        &self,
        key: SessionKey,
        descriptor: ConnectionDescriptor,
        geometry: Geometry,
        socket: ClientSocket,
    ) -> Result<SessionHandle, RejectReason> {
        if let Some((_, previous)) = self.inner.sessions.remove(&key) {
            info!(target: "termrelay::registry", "Superseding session {}", key);
            previous.cancel();
            previous.closed().await;
        }

        // Shutdown may have started while waiting on the lock or the previous session.
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            socket
                .reject(&Frame::error(RejectReason::ShuttingDown.to_string()))
                .await;
            return Err(RejectReason::ShuttingDown);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (session, handle) = RelaySession::new(
            id,
            key.clone(),
            descriptor,
            geometry,
            self.inner.connector.clone(),
            self.inner.config.connect_timeout,
            socket,
        );
        self.inner.sessions.insert(key.clone(), handle.clone());
        info!(target: "termrelay::registry", "Registered session {} ({} live)", key, self.len());

        let inner = self.inner.clone();
        tokio::spawn(session.run(move || {
            if inner.sessions.remove_if(&key, |_, h| h.id() == id).is_some() {
                debug!(target: "termrelay::registry", "Deregistered session {}", key);
            }
        }));

        Ok(handle)
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.inner.sessions.get(key).map(|h| h.value().clone())
    }

    /// Summaries of `user`'s live sessions, oldest first.
    pub fn list_for_user(&self, user: UserId) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.value().user_id() == user)
            .map(|entry| entry.value().summary())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Close one session and wait for it. Returns `false` for an unknown key.
    pub async fn terminate(&self, key: &SessionKey) -> bool {
        let Some(handle) = self.get(key) else {
            return false;
        };
        info!(target: "termrelay::registry", "Terminating session {}", key);
        handle.cancel();
        handle.closed().await;
        true
    }

    /// Feed a client frame into a live session.
    pub async fn dispatch(&self, key: &SessionKey, frame: Frame) -> Result<(), RelayError> {
        match self.get(key) {
            Some(handle) => handle.send(frame).await,
            None => {
                debug!(target: "termrelay::registry", "Frame for unknown session {}", key);
                Err(RelayError::ProtocolMisuse(format!("no live session {}", key)))
            }
        }
    }

    /// Refuse new accepts, close every session and wait for them, bounded by
    /// the shutdown grace period.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if handles.is_empty() {
            return;
        }

        info!(target: "termrelay::registry", "Shutting down {} sessions", handles.len());
        for handle in &handles {
            handle.cancel();
        }
        let all_closed = futures::future::join_all(handles.iter().map(|h| h.closed()));
        if tokio::time::timeout(self.inner.config.shutdown_grace, all_closed)
            .await
            .is_err()
        {
            warn!(
                target: "termrelay::registry",
                "{} sessions still open after {:?}",
                self.len(),
                self.inner.config.shutdown_grace
            );
        }
    }
}
