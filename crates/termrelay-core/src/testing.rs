//! In-memory collaborators for relay and registry tests.

use crate::error::RemoteError;
use crate::remote::{RemoteConnector, RemoteDuplex, RemoteInput, ResizeOutcome};
use crate::socket::{ClientSocket, Inbound, Outbound};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc as fmpsc;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use termrelay_types::{ConnectionDescriptor, Frame, Geometry};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// What the remote side observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Write(Vec<u8>),
    Resize(Geometry),
    Closed,
}

#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed,
    Fail(RemoteError),
    Hang,
}

/// Scripted [`RemoteConnector`] that also tracks how many duplexes are live.
pub struct MockConnector {
    behaviour: Behaviour,
    resizable: bool,
    remotes: mpsc::UnboundedSender<MockRemote>,
    pub opened: AtomicUsize,
    live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(behaviour: Behaviour) -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        Self::build(behaviour, true)
    }

    /// A transport with no notion of window size.
    pub fn without_resize() -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        Self::build(Behaviour::Succeed, false)
    }

    fn build(
        behaviour: Behaviour,
        resizable: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            behaviour,
            resizable,
            remotes: tx,
            opened: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
        });
        (connector, rx)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConnector for MockConnector {
    async fn open(
        &self,
        _descriptor: &ConnectionDescriptor,
        _geometry: Geometry,
    ) -> Result<RemoteDuplex, RemoteError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Fail(e) => return Err(e.clone()),
            Behaviour::Hang => std::future::pending::<()>().await,
            Behaviour::Succeed => {}
        }

        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let gone = Arc::new(AtomicBool::new(false));
        let input = MockInput {
            events: events_tx,
            closed: AtomicBool::new(false),
            gone: gone.clone(),
            resizable: self.resizable,
            live: self.live.clone(),
        };
        let _ = self.remotes.send(MockRemote {
            output: Some(output_tx),
            events: events_rx,
            gone,
        });
        Ok(RemoteDuplex::new(
            UnboundedReceiverStream::new(output_rx),
            input,
        ))
    }
}

struct MockInput {
    events: mpsc::UnboundedSender<RemoteEvent>,
    closed: AtomicBool,
    gone: Arc<AtomicBool>,
    resizable: bool,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteInput for MockInput {
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.gone.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "remote closed"));
        }
        let _ = self.events.send(RemoteEvent::Write(data.to_vec()));
        Ok(())
    }

    async fn resize(&self, geometry: Geometry) -> io::Result<ResizeOutcome> {
        if !self.resizable {
            return Ok(ResizeOutcome::Unsupported);
        }
        let _ = self.events.send(RemoteEvent::Resize(geometry));
        Ok(ResizeOutcome::Applied)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            let _ = self.events.send(RemoteEvent::Closed);
        }
    }
}

/// Test-side handle on an opened mock duplex.
pub struct MockRemote {
    output: Option<mpsc::UnboundedSender<io::Result<Bytes>>>,
    events: mpsc::UnboundedReceiver<RemoteEvent>,
    gone: Arc<AtomicBool>,
}

impl MockRemote {
    pub fn emit(&self, data: &[u8]) {
        if let Some(tx) = &self.output {
            let _ = tx.send(Ok(Bytes::copy_from_slice(data)));
        }
    }

    /// The remote shell exits: output hits EOF and writes fail.
    pub fn hang_up(&mut self) {
        self.gone.store(true, Ordering::SeqCst);
        self.output = None;
    }

    /// Writes fail but output stays open.
    pub fn break_input(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    pub async fn next_event(&mut self) -> RemoteEvent {
        tokio::time::timeout(RECV_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for remote event")
            .expect("remote event channel closed")
    }
}

/// Test-side end of an in-memory client socket.
pub struct ClientEnd {
    tx: fmpsc::UnboundedSender<Inbound>,
    rx: fmpsc::UnboundedReceiver<Outbound>,
}

pub fn socket_pair() -> (ClientSocket, ClientEnd) {
    let (out_tx, out_rx) = fmpsc::unbounded::<Outbound>();
    let (in_tx, in_rx) = fmpsc::unbounded::<Inbound>();
    let socket = ClientSocket::new(out_tx, in_rx.map(Ok::<_, io::Error>));
    (socket, ClientEnd { tx: in_tx, rx: out_rx })
}

impl ClientEnd {
    pub fn send(&self, frame: &Frame) {
        let _ = self
            .tx
            .unbounded_send(Inbound::Text(frame.encode().unwrap()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.tx.unbounded_send(Inbound::Text(text.to_string()));
    }

    pub fn close(&self) {
        let _ = self.tx.unbounded_send(Inbound::Close);
    }

    /// Next message, or `None` once the relay dropped its sink.
    pub async fn next(&mut self) -> Option<Outbound> {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.next())
            .await
            .expect("timed out waiting for relay message")
    }

    /// Next frame. Panics on anything else.
    pub async fn next_frame(&mut self) -> Frame {
        match self.next().await {
            Some(Outbound::Text(text)) => Frame::decode(&text).unwrap(),
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    /// Collect every frame until the relay closes the socket.
    pub async fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(msg) = self.next().await {
            match msg {
                Outbound::Text(text) => frames.push(Frame::decode(&text).unwrap()),
                Outbound::Close => break,
            }
        }
        frames
    }
}
