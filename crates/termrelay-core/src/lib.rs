//! Relay sessions, the session registry and their collaborators.

mod auth;
mod credentials;
mod error;
mod pty;
mod registry;
mod relay;
mod remote;
mod secret;
mod socket;

#[cfg(test)]
mod testing;

pub use auth::{DEFAULT_ISSUER, DEFAULT_TOKEN_TTL, JwtValidator, TokenValidator};
pub use credentials::{CredentialStore, StaticCredentialStore, StoredConnection};
pub use error::{AuthError, LookupError, RejectReason, RelayError, RemoteError, SecretError};
pub use pty::{SshPtyConfig, SshPtyConnector};
pub use registry::{AcceptRequest, RegistryConfig, SessionRegistry};
pub use relay::{MAX_INPUT_SIZE, SessionHandle};
pub use remote::{RemoteConnector, RemoteDuplex, RemoteInput, RemoteOutput, ResizeOutcome};
pub use secret::{ENCRYPTED_PREFIX, SecretCipher};
pub use socket::{ClientSocket, Inbound, Outbound, SocketSink, SocketStream};

/// Result type for termrelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
