//! ssh transport running inside a local pseudo-terminal.
//!
//! The system `ssh` client is spawned in a PTY so the remote shell sees a real
//! terminal (`xterm-256color`, initial geometry from the client). Key
//! authentication hands the key to ssh through a private temp file; password
//! authentication answers ssh's password prompt while the session is still
//! opening. Anything ssh prints before the shell is live is used to classify
//! failures and is not forwarded to the client.

use crate::error::RemoteError;
use crate::remote::{RemoteConnector, RemoteDuplex, RemoteInput, ResizeOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use regex::Regex;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use termrelay_types::{AuthMethod, ConnectionDescriptor, Geometry};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, trace, warn};

static PASSWORD_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)password[^\n:]*:\s*$").unwrap());

static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)permission denied|authentication failed|too many authentication failures")
        .unwrap()
});

/// Line starts of the diagnostics ssh prints when it never reaches a shell.
const DIAGNOSTIC_PREFIXES: [&str; 9] = [
    "ssh:",
    "kex_exchange_identification:",
    "Could not resolve hostname",
    "Host key verification failed",
    "Connection refused",
    "Connection timed out",
    "Connection closed by",
    "No route to host",
    "Network is unreachable",
];

static CONNECT_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    let alternatives: Vec<String> = DIAGNOSTIC_PREFIXES.iter().map(|p| regex::escape(p)).collect();
    Regex::new(&format!(r"(?m)^\s*(?:{})", alternatives.join("|"))).unwrap()
});

/// Settings for [`SshPtyConnector`].
#[derive(Debug, Clone)]
pub struct SshPtyConfig {
    /// Path to the ssh client binary.
    pub ssh_path: PathBuf,
    /// Value for ssh's `StrictHostKeyChecking` option.
    pub host_key_checking: String,
    /// `TERM` exported to the remote shell.
    pub term: String,
    /// Passed to ssh as `ConnectTimeout`.
    pub connect_timeout: Duration,
}

impl Default for SshPtyConfig {
    fn default() -> Self {
        Self {
            ssh_path: PathBuf::from("ssh"),
            host_key_checking: "accept-new".to_string(),
            term: "xterm-256color".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens remote shells by running `ssh` in a PTY.
#[derive(Debug, Clone, Default)]
pub struct SshPtyConnector {
    config: SshPtyConfig,
}

impl SshPtyConnector {
    pub fn new(config: SshPtyConfig) -> Self {
        Self { config }
    }

    /// ssh command-line arguments for `descriptor`.
    fn ssh_args(&self, descriptor: &ConnectionDescriptor, key_path: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            "-p".to_string(),
            descriptor.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.config.host_key_checking),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];

        match (&descriptor.auth, key_path) {
            (AuthMethod::Key(_), Some(path)) => {
                args.extend([
                    "-i".to_string(),
                    path.display().to_string(),
                    "-o".to_string(),
                    "IdentitiesOnly=yes".to_string(),
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    "PreferredAuthentications=publickey".to_string(),
                ]);
            }
            _ => {
                args.extend([
                    "-o".to_string(),
                    "PreferredAuthentications=password,keyboard-interactive".to_string(),
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                    "-o".to_string(),
                    "NumberOfPasswordPrompts=1".to_string(),
                ]);
            }
        }

        args.extend([
            "-l".to_string(),
            descriptor.username.clone(),
            descriptor.host.clone(),
        ]);
        args
    }

    fn write_key_file(key: &str) -> Result<NamedTempFile, RemoteError> {
        let mut file = NamedTempFile::new()
            .map_err(|e| RemoteError::Unreachable(format!("failed to stage private key: {}", e)))?;
        file.write_all(key.as_bytes())
            .and_then(|_| {
                if key.ends_with('\n') {
                    Ok(())
                } else {
                    file.write_all(b"\n")
                }
            })
            .and_then(|_| file.flush())
            .map_err(|e| RemoteError::Unreachable(format!("failed to stage private key: {}", e)))?;
        Ok(file)
    }

    /// Wait until the remote shell is live, answering the password prompt on
    /// the way. Returns output that must be forwarded to the client.
    ///
    /// Only complete lines are classified, so a diagnostic split across reads
    /// is reported whole. The shell counts as live once output arrives that
    /// is neither a diagnostic nor the start of one.
    async fn handshake(
        &self,
        descriptor: &ConnectionDescriptor,
        output: &mut mpsc::Receiver<io::Result<Bytes>>,
        input: &PtyInput,
    ) -> Result<Vec<Bytes>, RemoteError> {
        let mut transcript = String::new();
        let mut pending = Vec::new();
        let mut password_sent = false;

        loop {
            let chunk = match output.recv().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(RemoteError::Unreachable(e.to_string())),
                None => return Err(classify_failure(&transcript)),
            };
            transcript.push_str(&String::from_utf8_lossy(&chunk));
            pending.push(chunk);
            trace!(target: "termrelay::remote", "ssh handshake output: {:?}", transcript);

            let complete = complete_lines(&transcript);
            if AUTH_FAILURE.is_match(complete) || CONNECT_FAILURE.is_match(complete) {
                return Err(classify_failure(complete));
            }

            if let AuthMethod::Password(password) = &descriptor.auth {
                if PASSWORD_PROMPT.is_match(&transcript) {
                    if password_sent {
                        return Err(RemoteError::AuthFailed("password rejected".to_string()));
                    }
                    debug!(target: "termrelay::remote", "Answering password prompt for {}", descriptor.target());
                    input
                        .write(format!("{}\n", password).as_bytes())
                        .await
                        .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
                    password_sent = true;
                    transcript.clear();
                    pending.clear();
                    continue;
                }
                if !password_sent {
                    continue;
                }
            }

            if shell_output_started(&transcript) {
                return Ok(pending);
            }
        }
    }
}

/// The part of `transcript` up to and including its last newline.
fn complete_lines(transcript: &str) -> &str {
    match transcript.rfind('\n') {
        Some(end) => &transcript[..=end],
        None => "",
    }
}

/// Whether `transcript` holds shell output rather than (the start of) an ssh
/// diagnostic. Complete diagnostic lines have already been ruled out.
fn shell_output_started(transcript: &str) -> bool {
    if transcript.trim().is_empty() {
        return false;
    }
    let partial = transcript.rsplit('\n').next().unwrap_or("").trim_start();
    if partial.is_empty() {
        return true;
    }
    !DIAGNOSTIC_PREFIXES
        .iter()
        .any(|prefix| prefix.starts_with(partial) || partial.starts_with(prefix))
}

/// Map pre-shell ssh output to a failure.
fn classify_failure(transcript: &str) -> RemoteError {
    let last_line = transcript
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("ssh exited before the session was established")
        .to_string();

    if AUTH_FAILURE.is_match(transcript) {
        RemoteError::AuthFailed(last_line)
    } else {
        RemoteError::Unreachable(last_line)
    }
}

#[async_trait]
impl RemoteConnector for SshPtyConnector {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        geometry: Geometry,
    ) -> Result<RemoteDuplex, RemoteError> {
        let key_file = match &descriptor.auth {
            AuthMethod::Key(key) => Some(Self::write_key_file(key)?),
            AuthMethod::Password(_) => None,
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(geometry))
            .map_err(|e| RemoteError::Unreachable(format!("failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&self.config.ssh_path);
        cmd.args(self.ssh_args(descriptor, key_file.as_ref().map(|f| f.path())));
        cmd.env("TERM", &self.config.term);

        info!(
            target: "termrelay::remote",
            "Spawning ssh for {} ({} auth, {})",
            descriptor.target(),
            descriptor.auth.kind(),
            geometry
        );

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!(target: "termrelay::remote", "Failed to spawn ssh: {}", e);
            RemoteError::Unreachable(format!("failed to start ssh: {}", e))
        })?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RemoteError::Unreachable(format!("PTY error: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RemoteError::Unreachable(format!("PTY error: {}", e)))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel(64);
        spawn_reader(reader, tx, shutdown.clone(), descriptor.target());

        let input = PtyInput {
            writer: Arc::new(Mutex::new(Some(writer))),
            master: Mutex::new(Some(pair.master)),
            child: Mutex::new(child),
            shutdown,
            _key_file: key_file,
        };

        // Dropping `input` on failure kills ssh.
        let pending = self.handshake(descriptor, &mut rx, &input).await?;

        info!(target: "termrelay::remote", "Remote shell live for {}", descriptor.target());
        let output = futures::stream::iter(pending.into_iter().map(Ok)).chain(ReceiverStream::new(rx));
        Ok(RemoteDuplex::new(output, input))
    }
}

fn pty_size(geometry: Geometry) -> PtySize {
    PtySize {
        rows: geometry.rows,
        cols: geometry.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// PTY reads block, so they run on a dedicated thread feeding a channel.
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<io::Result<Bytes>>,
    shutdown: Arc<AtomicBool>,
    target: String,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        debug!(target: "termrelay::remote", "PTY reader thread started for {}", target);
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Linux reports EIO on the master once the child side is gone.
                    if shutdown.load(Ordering::SeqCst) || is_pty_eof(&e) {
                        break;
                    }
                    warn!(target: "termrelay::remote", "PTY read error for {}: {}", target, e);
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
        debug!(target: "termrelay::remote", "PTY reader thread exiting for {}", target);
    });
}

#[cfg(unix)]
fn is_pty_eof(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EIO)
}

#[cfg(not(unix))]
fn is_pty_eof(_e: &io::Error) -> bool {
    false
}

struct PtyInput {
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    shutdown: Arc<AtomicBool>,
    _key_file: Option<NamedTempFile>,
}

impl PtyInput {
    fn teardown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
        }
        // Closing the master unblocks the reader thread.
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = child.try_wait();
    }
}

impl Drop for PtyInput {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[async_trait]
impl RemoteInput for PtyInput {
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        let writer = self.writer.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(w) => {
                    w.write_all(&data)?;
                    w.flush()
                }
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "PTY closed")),
            }
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn resize(&self, geometry: Geometry) -> io::Result<ResizeOutcome> {
        let master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
        match master.as_ref() {
            Some(master) => {
                master
                    .resize(pty_size(geometry))
                    .map_err(|e| io::Error::other(e.to_string()))?;
                Ok(ResizeOutcome::Applied)
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "PTY closed")),
        }
    }

    async fn close(&self) {
        self.teardown();
    }
}
