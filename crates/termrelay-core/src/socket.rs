//! Transport-neutral client socket.
//!
//! The relay only needs a sink of outbound messages and a stream of inbound
//! ones. The server adapts its WebSocket into a [`ClientSocket`]; tests use
//! in-memory channels.

use futures::{Sink, SinkExt, Stream, TryStreamExt};
use std::io;
use std::pin::Pin;
use termrelay_types::Frame;

/// A message received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// A message for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

pub type SocketSink = Pin<Box<dyn Sink<Outbound, Error = io::Error> + Send>>;
pub type SocketStream = Pin<Box<dyn Stream<Item = io::Result<Inbound>> + Send>>;

/// Both halves of an accepted client socket.
pub struct ClientSocket {
    pub(crate) sink: SocketSink,
    pub(crate) stream: SocketStream,
}

impl ClientSocket {
    pub fn new<Si, St, E1, E2>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Outbound, Error = E1> + Send + 'static,
        St: Stream<Item = Result<Inbound, E2>> + Send + 'static,
        E1: std::error::Error + Send + Sync + 'static,
        E2: std::error::Error + Send + Sync + 'static,
    {
        Self {
            sink: Box::pin(sink.sink_map_err(io::Error::other)),
            stream: Box::pin(stream.map_err(io::Error::other)),
        }
    }

    /// Send one frame and close. Used when an accept is refused.
    pub async fn reject(mut self, frame: &Frame) {
        let _ = send_frame(&mut self.sink, frame).await;
        let _ = self.sink.send(Outbound::Close).await;
        let _ = self.sink.close().await;
    }

    pub(crate) fn into_parts(self) -> (SocketSink, SocketStream) {
        (self.sink, self.stream)
    }
}

impl std::fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSocket").finish_non_exhaustive()
    }
}

pub(crate) async fn send_frame(sink: &mut SocketSink, frame: &Frame) -> io::Result<()> {
    let text = frame.encode().map_err(io::Error::other)?;
    sink.send(Outbound::Text(text)).await
}
