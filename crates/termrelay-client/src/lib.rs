//! Client side of the termrelay protocol: a WebSocket transport adapter that
//! turns relay frames into an ordered stream of [`ClientEvent`]s.

mod client;
mod config;
mod error;
mod events;
mod reconnect;

pub use client::TerminalClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{ClientEvent, EventStream, TerminalHandler, deliver, dispatch};
pub use reconnect::{CloseReason, ReconnectPolicy, ReconnectTrigger};
