//! Remote duplex abstraction.
//!
//! A [`RemoteConnector`] opens a [`RemoteDuplex`] to the host described by a
//! [`ConnectionDescriptor`]. The duplex is split into an output stream, owned
//! by the outbound pump, and a shared [`RemoteInput`] used by the inbound pump
//! and by teardown.

use crate::error::RemoteError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use termrelay_types::{ConnectionDescriptor, Geometry};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

/// Bytes produced by the remote shell, in order. The stream ends at EOF.
pub type RemoteOutput = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Result of propagating a resize to the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Applied,
    /// The transport has no notion of a window size.
    Unsupported,
}

/// Write half and control surface of a remote duplex.
#[async_trait]
pub trait RemoteInput: Send + Sync {
    /// Write `data` verbatim to the remote shell.
    async fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Propagate a terminal resize.
    async fn resize(&self, _geometry: Geometry) -> io::Result<ResizeOutcome> {
        Ok(ResizeOutcome::Unsupported)
    }

    /// Release the remote session. Must be idempotent.
    async fn close(&self);
}

/// Opens remote duplexes.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        geometry: Geometry,
    ) -> Result<RemoteDuplex, RemoteError>;
}

/// A live bidirectional byte channel to a remote shell.
pub struct RemoteDuplex {
    output: RemoteOutput,
    input: Arc<dyn RemoteInput>,
}

impl RemoteDuplex {
    pub fn new<S, I>(output: S, input: I) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
        I: RemoteInput + 'static,
    {
        Self {
            output: Box::pin(output),
            input: Arc::new(input),
        }
    }

    /// Wrap plain async reader/writer halves. Resize is unsupported.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::new(
            ReaderStream::new(reader),
            IoInput {
                writer: Mutex::new(Some(writer)),
            },
        )
    }

    pub fn into_parts(self) -> (RemoteOutput, Arc<dyn RemoteInput>) {
        (self.output, self.input)
    }
}

impl std::fmt::Debug for RemoteDuplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDuplex").finish_non_exhaustive()
    }
}

struct IoInput<W> {
    writer: Mutex<Option<W>>,
}

#[async_trait]
impl<W> RemoteInput for IoInput<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "remote duplex closed"))?;
        writer.write_all(data).await?;
        writer.flush().await
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}
