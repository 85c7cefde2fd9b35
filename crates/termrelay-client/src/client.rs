//! WebSocket transport adapter for a single terminal.
//!
//! A [`TerminalClient`] owns at most one socket task at a time. Every state
//! change made by that task happens under the link lock and only while the
//! task's generation is still current, so a task orphaned by `disconnect()`
//! or a newer `connect()` can never flip flags or emit events.

use crate::config::ClientConfig;
use crate::events::{ClientEvent, EventStream};
use crate::reconnect::CloseReason;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use termrelay_types::{Frame, Geometry};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Upper bound on the close handshake when leaving a socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a terminal connection. Cheap to clone.
#[derive(Clone)]
pub struct TerminalClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    connected: AtomicBool,
    connecting: AtomicBool,
    link: Mutex<Link>,
    geometry: Mutex<Option<Geometry>>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

/// State owned by the current socket task.
struct Link {
    generation: u64,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TerminalClient {
    pub fn new(config: ClientConfig) -> (Self, EventStream) {
        let (events, rx) = mpsc::unbounded_channel();
        let geometry = config.geometry;
        let client = Self {
            inner: Arc::new(Inner {
                config,
                connected: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                link: Mutex::new(Link {
                    generation: 0,
                    outgoing: None,
                    cancel: CancellationToken::new(),
                }),
                geometry: Mutex::new(geometry),
                events,
            }),
        };
        (client, rx)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    /// Last geometry requested through `send_resize` or the config.
    pub fn geometry(&self) -> Option<Geometry> {
        *lock(&self.inner.geometry)
    }

    /// Start connecting. Returns `false` without doing anything when there
    /// is no token, or when a socket is already open or being opened.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> bool {
        if self.inner.config.token.is_none() {
            tracing::debug!(target: "termrelay::client", "No token configured, not connecting");
            return false;
        }
        if let Err(e) = self.inner.config.socket_url(None) {
            tracing::warn!(target: "termrelay::client", "Cannot connect: {}", e);
            let _ = self.inner.events.send(ClientEvent::Error(e.to_string()));
            return false;
        }

        let mut link = lock(&self.inner.link);
        if self.is_connected() || self.is_connecting() {
            return false;
        }
        self.inner.connecting.store(true, Ordering::SeqCst);
        link.generation += 1;
        link.cancel = CancellationToken::new();

        tracing::debug!(
            target: "termrelay::client",
            "Connecting to connection {} (generation {})",
            self.inner.config.connection_id,
            link.generation
        );
        tokio::spawn(run(self.inner.clone(), link.generation, link.cancel.clone()));
        true
    }

    /// Close the socket and cancel any pending reconnect. Safe to call at
    /// any time, any number of times.
    pub fn disconnect(&self) {
        let mut link = lock(&self.inner.link);
        link.generation += 1;
        link.cancel.cancel();
        link.outgoing = None;

        let was_connected = self.inner.connected.swap(false, Ordering::SeqCst);
        let was_connecting = self.inner.connecting.swap(false, Ordering::SeqCst);
        if was_connected || was_connecting {
            tracing::info!(
                target: "termrelay::client",
                "Disconnected from connection {}",
                self.inner.config.connection_id
            );
            let _ = self.inner.events.send(ClientEvent::Disconnected);
        }
    }

    /// Send keystrokes. Returns `false` if the socket is not open.
    pub fn send_input(&self, data: &str) -> bool {
        self.send_frame(&Frame::input(data))
    }

    /// Record the new geometry and send it if the socket is open.
    /// Zero dimensions are rejected.
    pub fn send_resize(&self, cols: u16, rows: u16) -> bool {
        let geometry = Geometry::new(cols, rows);
        if !geometry.is_valid() {
            return false;
        }
        *lock(&self.inner.geometry) = Some(geometry);
        self.send_frame(&Frame::resize(geometry))
    }

    fn send_frame(&self, frame: &Frame) -> bool {
        if !self.is_connected() {
            return false;
        }
        let wire = match frame.encode() {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(target: "termrelay::client", "Failed to encode {} frame: {}", frame.kind(), e);
                return false;
            }
        };
        match &lock(&self.inner.link).outgoing {
            Some(tx) => tx.send(Message::text(wire)).is_ok(),
            None => false,
        }
    }
}

impl Inner {
    /// Run `f` under the link lock if `generation` is still current.
    fn with_current<R>(&self, generation: u64, f: impl FnOnce(&mut Link) -> R) -> Option<R> {
        let mut link = lock(&self.link);
        if link.generation != generation {
            return None;
        }
        Some(f(&mut link))
    }

    fn emit(&self, generation: u64, event: ClientEvent) {
        self.with_current(generation, |_| {
            let _ = self.events.send(event);
        });
    }

    fn handle_wire(&self, generation: u64, decoded: Result<Frame, termrelay_types::DecodeError>) {
        let event = match decoded {
            Ok(Frame::Output { data }) => ClientEvent::Output(data),
            Ok(Frame::Status { message }) => ClientEvent::Status(message),
            Ok(Frame::Error { message }) => ClientEvent::Error(message),
            Ok(frame) => {
                tracing::warn!(
                    target: "termrelay::client",
                    "Dropping unexpected {} frame from relay",
                    frame.kind()
                );
                return;
            }
            Err(e) => {
                tracing::warn!(target: "termrelay::client", "Invalid frame from relay: {}", e);
                ClientEvent::Error(format!("Invalid frame from relay: {}", e))
            }
        };
        self.emit(generation, event);
    }
}

/// Socket task: one connection attempt, then retries per the reconnect policy.
async fn run(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    let mut attempt = 0u32;
    loop {
        let (reason, opened) = connect_once(&inner, generation, &cancel).await;
        if opened {
            attempt = 0;
        }

        let retry = inner
            .config
            .reconnect
            .as_ref()
            .filter(|policy| policy.should_reconnect(attempt, reason))
            .map(|policy| policy.next_delay(attempt));

        let still_current = inner
            .with_current(generation, |link| {
                link.outgoing = None;
                let was_connected = inner.connected.swap(false, Ordering::SeqCst);
                inner.connecting.store(retry.is_some(), Ordering::SeqCst);
                if was_connected || retry.is_none() {
                    let _ = inner.events.send(ClientEvent::Disconnected);
                }
            })
            .is_some();
        let Some(delay) = retry.filter(|_| still_current) else {
            return;
        };

        attempt += 1;
        tracing::info!(
            target: "termrelay::client",
            "Reconnecting in {:?} (attempt {})",
            delay,
            attempt
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Open one socket and pump it until it closes. Returns why it ended and
/// whether it was ever open.
async fn connect_once(
    inner: &Arc<Inner>,
    generation: u64,
    cancel: &CancellationToken,
) -> (CloseReason, bool) {
    let geometry = *lock(&inner.geometry);
    let url = match inner.config.socket_url(geometry) {
        Ok(url) => url,
        Err(e) => {
            inner.emit(generation, ClientEvent::Error(e.to_string()));
            return (CloseReason::Failed, false);
        }
    };

    let connected = tokio::select! {
        _ = cancel.cancelled() => return (CloseReason::Requested, false),
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };
    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::warn!(target: "termrelay::client", "Connection failed: {}", e);
            inner.emit(generation, ClientEvent::Error(format!("Connection failed: {}", e)));
            return (CloseReason::Failed, false);
        }
    };

    let (mut ws_tx, mut ws_rx) = stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    let opened = inner
        .with_current(generation, |link| {
            link.outgoing = Some(out_tx);
            inner.connected.store(true, Ordering::SeqCst);
            inner.connecting.store(false, Ordering::SeqCst);
            let _ = inner.events.send(ClientEvent::Connected);
        })
        .is_some();
    if !opened {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_tx.close()).await;
        return (CloseReason::Requested, false);
    }
    tracing::info!(
        target: "termrelay::client",
        "Connected to connection {}",
        inner.config.connection_id
    );

    let reason = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break CloseReason::Requested,

            Some(message) = out_rx.recv() => {
                if let Err(e) = ws_tx.send(message).await {
                    tracing::warn!(target: "termrelay::client", "Send failed: {}", e);
                    break CloseReason::Failed;
                }
            }

            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    inner.handle_wire(generation, Frame::decode(text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    inner.handle_wire(generation, Frame::decode_bytes(&bytes));
                }
                Some(Ok(Message::Close(_))) | None => break CloseReason::Remote,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(target: "termrelay::client", "Socket error: {}", e);
                    break CloseReason::Failed;
                }
            }
        }
    };

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_tx.close()).await;
    tracing::debug!(target: "termrelay::client", "Socket closed ({:?})", reason);
    (reason, true)
}
