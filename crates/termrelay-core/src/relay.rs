//! Relay session: one client socket bridged to one remote shell.
//!
//! A session walks `Opening -> Streaming -> Closing -> Closed`. While
//! streaming, an outbound pump turns remote bytes into `output` frames and an
//! inbound pump applies `input` and `resize` frames to the remote side. Both
//! pumps run in the session task under one [`CancellationToken`]; whichever
//! finishes first ends the session, and dropping the other pump's future
//! cancels any read it was parked in.

use crate::error::{RelayError, RemoteError};
use crate::remote::{RemoteConnector, RemoteInput, RemoteOutput, ResizeOutcome};
use crate::socket::{ClientSocket, Inbound, Outbound, SocketSink, SocketStream, send_frame};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use termrelay_types::{
    ConnectionDescriptor, Frame, Geometry, STATUS_CONNECTED, STATUS_DISCONNECTED, SessionKey,
    SessionState, SessionSummary, UserId, Utf8Chunker,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Maximum size for one terminal input frame (64KB, generous for pastes).
pub const MAX_INPUT_SIZE: usize = 64 * 1024;

/// Upper bound on the farewell frames sent while closing.
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(2);

const COMMAND_CAPACITY: usize = 64;

struct SessionShared {
    id: u64,
    key: SessionKey,
    user_id: UserId,
    target: String,
    state: watch::Sender<SessionState>,
    geometry: Mutex<Geometry>,
    created_at: i64,
    last_activity: AtomicI64,
    cancel: CancellationToken,
    commands: mpsc::Sender<Frame>,
}

impl SessionShared {
    fn transition(&self, next: SessionState) {
        let moved = self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(target: "termrelay::relay", "Session {} -> {:?}", self.key, next);
        }
    }

    fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn geometry(&self) -> Geometry {
        *self.geometry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_geometry(&self, geometry: Geometry) {
        *self.geometry.lock().unwrap_or_else(PoisonError::into_inner) = geometry;
    }
}

/// Cheap, cloneable view of a live relay session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    /// Unique per process. Distinguishes a superseded session from its replacement.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.shared.key
    }

    pub fn user_id(&self) -> UserId {
        self.shared.user_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn geometry(&self) -> Geometry {
        self.shared.geometry()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            connection_id: self.shared.key.connection_id,
            client_id: self.shared.key.client_id.clone(),
            user_id: self.shared.user_id,
            target: self.shared.target.clone(),
            state: self.state(),
            geometry: self.geometry(),
            created_at: self.shared.created_at,
            last_activity_at: self.shared.last_activity.load(Ordering::Relaxed),
        }
    }

    /// Ask the session to close. Returns immediately.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Wait until the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| s.is_terminal()).await;
    }

    /// Feed a client frame into the session from outside its socket.
    pub async fn send(&self, frame: Frame) -> Result<(), RelayError> {
        if !frame.kind().is_client_originated() {
            return Err(RelayError::ProtocolMisuse(format!(
                "{} frames are not accepted by the relay",
                frame.kind()
            )));
        }
        if self.shared.cancel.is_cancelled() || self.state().is_terminal() {
            return Err(RelayError::ProtocolMisuse(format!(
                "session {} is closed",
                self.shared.key
            )));
        }
        self.shared.commands.send(frame).await.map_err(|_| {
            RelayError::ProtocolMisuse(format!("session {} is closed", self.shared.key))
        })
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("key", &self.shared.key)
            .field("state", &self.state())
            .finish()
    }
}

/// Everything a session needs to run.
pub(crate) struct RelaySession {
    shared: Arc<SessionShared>,
    descriptor: ConnectionDescriptor,
    connector: Arc<dyn RemoteConnector>,
    connect_timeout: Duration,
    socket: ClientSocket,
    commands: mpsc::Receiver<Frame>,
}

/// Why streaming stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    RemoteClosed,
    RemoteFailed,
    ClientClosed,
    SocketReadFailed,
    SocketWriteFailed,
    Cancelled,
}

impl PumpExit {
    fn socket_writable(self) -> bool {
        !matches!(self, PumpExit::SocketWriteFailed | PumpExit::SocketReadFailed)
    }
}

impl RelaySession {
    pub(crate) fn new(
        id: u64,
        key: SessionKey,
        descriptor: ConnectionDescriptor,
        geometry: Geometry,
        connector: Arc<dyn RemoteConnector>,
        connect_timeout: Duration,
        socket: ClientSocket,
    ) -> (Self, SessionHandle) {
        let now = Utc::now().timestamp_millis();
        let (state, _) = watch::channel(SessionState::Opening);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let shared = Arc::new(SessionShared {
            id,
            key,
            user_id: descriptor.owner,
            target: descriptor.target(),
            state,
            geometry: Mutex::new(geometry),
            created_at: now,
            last_activity: AtomicI64::new(now),
            cancel: CancellationToken::new(),
            commands: commands_tx,
        });
        let handle = SessionHandle {
            shared: shared.clone(),
        };
        let session = Self {
            shared,
            descriptor,
            connector,
            connect_timeout,
            socket,
            commands: commands_rx,
        };
        (session, handle)
    }

    /// Drive the session to `Closed`. `release` deregisters it and runs
    /// before the state becomes `Closed`.
    pub(crate) async fn run<F>(self, release: F)
    where
        F: FnOnce() + Send,
    {
        let RelaySession {
            shared,
            descriptor,
            connector,
            connect_timeout,
            socket,
            mut commands,
        } = self;
        let (mut sink, mut stream) = socket.into_parts();

        info!(target: "termrelay::relay", "Opening session {} to {}", shared.key, shared.target);
        let connecting = Frame::status(format!("Connecting to {}...", shared.target));
        if send_frame(&mut sink, &connecting).await.is_err() {
            debug!(target: "termrelay::relay", "Client {} left before opening", shared.key);
            release();
            shared.transition(SessionState::Closed);
            return;
        }

        let opened = tokio::select! {
            _ = shared.cancel.cancelled() => None,
            result = tokio::time::timeout(
                connect_timeout,
                connector.open(&descriptor, shared.geometry()),
            ) => Some(match result {
                Ok(opened) => opened,
                Err(_) => Err(RemoteError::timed_out(connect_timeout)),
            }),
        };
        drop(descriptor);

        let duplex = match opened {
            Some(Ok(duplex)) => duplex,
            Some(Err(e)) => {
                warn!(target: "termrelay::relay", "Session {} failed to open: {}", shared.key, e);
                let error = Frame::error(RelayError::from(e).to_string());
                farewell(&mut sink, Some(error)).await;
                release();
                shared.transition(SessionState::Closed);
                return;
            }
            None => {
                info!(target: "termrelay::relay", "Session {} cancelled while opening", shared.key);
                farewell(&mut sink, Some(Frame::status(STATUS_DISCONNECTED))).await;
                release();
                shared.transition(SessionState::Closed);
                return;
            }
        };

        let (output, input) = duplex.into_parts();
        shared.transition(SessionState::Streaming);
        info!(target: "termrelay::relay", "Session {} streaming", shared.key);

        let exit = if send_frame(&mut sink, &Frame::status(STATUS_CONNECTED))
            .await
            .is_err()
        {
            PumpExit::SocketWriteFailed
        } else {
            tokio::select! {
                _ = shared.cancel.cancelled() => PumpExit::Cancelled,
                exit = outbound_pump(&shared, &mut sink, output) => exit,
                exit = inbound_pump(&shared, &mut stream, &mut commands, input.as_ref()) => exit,
            }
        };

        shared.transition(SessionState::Closing);
        info!(target: "termrelay::relay", "Closing session {} ({:?})", shared.key, exit);
        commands.close();
        input.close().await;

        if exit.socket_writable() {
            farewell(&mut sink, Some(Frame::status(STATUS_DISCONNECTED))).await;
        }

        release();
        shared.transition(SessionState::Closed);
        debug!(target: "termrelay::relay", "Session {} closed", shared.key);
    }
}

/// Best-effort final frame and close message.
async fn farewell(sink: &mut SocketSink, frame: Option<Frame>) {
    match tokio::time::timeout(FAREWELL_TIMEOUT, send_farewell(sink, frame)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!(target: "termrelay::relay", "Farewell not delivered: {}", e),
        Err(_) => trace!(target: "termrelay::relay", "Farewell timed out"),
    }
}

async fn send_farewell(sink: &mut SocketSink, frame: Option<Frame>) -> std::io::Result<()> {
    if let Some(frame) = frame {
        send_frame(sink, &frame).await?;
    }
    sink.send(Outbound::Close).await?;
    sink.close().await
}

async fn outbound_pump(
    shared: &SessionShared,
    sink: &mut SocketSink,
    mut output: RemoteOutput,
) -> PumpExit {
    let mut chunker = Utf8Chunker::new();
    loop {
        match output.next().await {
            Some(Ok(bytes)) => {
                shared.touch();
                let text = chunker.push(&bytes);
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = send_frame(sink, &Frame::output(text)).await {
                    debug!(target: "termrelay::relay", "Socket write failed for {}: {}", shared.key, e);
                    return PumpExit::SocketWriteFailed;
                }
            }
            Some(Err(e)) => {
                warn!(target: "termrelay::relay", "Remote read failed for {}: {}", shared.key, e);
                return PumpExit::RemoteFailed;
            }
            None => {
                let rest = chunker.finish();
                if !rest.is_empty() && send_frame(sink, &Frame::output(rest)).await.is_err() {
                    return PumpExit::SocketWriteFailed;
                }
                debug!(target: "termrelay::relay", "Remote closed for {}", shared.key);
                return PumpExit::RemoteClosed;
            }
        }
    }
}

async fn inbound_pump(
    shared: &SessionShared,
    stream: &mut SocketStream,
    commands: &mut mpsc::Receiver<Frame>,
    input: &dyn RemoteInput,
) -> PumpExit {
    loop {
        let decoded = tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Inbound::Text(text))) => Frame::decode(&text),
                Some(Ok(Inbound::Binary(bytes))) => Frame::decode_bytes(&bytes),
                Some(Ok(Inbound::Close)) | None => {
                    debug!(target: "termrelay::relay", "Client closed {}", shared.key);
                    return PumpExit::ClientClosed;
                }
                Some(Err(e)) => {
                    debug!(target: "termrelay::relay", "Socket read failed for {}: {}", shared.key, e);
                    return PumpExit::SocketReadFailed;
                }
            },
            Some(frame) = commands.recv() => Ok(frame),
        };

        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "termrelay::relay", "Dropping frame for {}: {}", shared.key, e);
                continue;
            }
        };

        match frame {
            Frame::Input { data } => {
                if data.len() > MAX_INPUT_SIZE {
                    warn!(
                        target: "termrelay::relay",
                        "Dropping oversized input for {}: {} bytes (max {})",
                        shared.key,
                        data.len(),
                        MAX_INPUT_SIZE
                    );
                    continue;
                }
                shared.touch();
                if let Err(e) = input.write(data.as_bytes()).await {
                    warn!(target: "termrelay::relay", "Remote write failed for {}: {}", shared.key, e);
                    return PumpExit::RemoteFailed;
                }
            }
            Frame::Resize { cols, rows } => {
                let geometry = Geometry::new(cols, rows);
                shared.set_geometry(geometry);
                match input.resize(geometry).await {
                    Ok(ResizeOutcome::Applied) => {
                        debug!(target: "termrelay::relay", "Resized {} to {}", shared.key, geometry)
                    }
                    Ok(ResizeOutcome::Unsupported) => {
                        trace!(target: "termrelay::relay", "Resize unsupported for {}", shared.key)
                    }
                    Err(e) => {
                        warn!(target: "termrelay::relay", "Resize failed for {}: {}", shared.key, e)
                    }
                }
            }
            other => {
                debug!(target: "termrelay::relay", "Ignoring {} frame from client {}", other.kind(), shared.key);
            }
        }
    }
}
