//! Shared types for the termrelay terminal relay.

mod connection;
mod frame;
mod session;
mod utf8;

pub use connection::*;
pub use frame::*;
pub use session::*;
pub use utf8::Utf8Chunker;
