//! Session supervision: spawn, run, and tear down exactly once.
//!
//! A session runs three tasks (output loop, input loop, keepalive). Each
//! reports why it stopped; the supervisor waits for the first report (or a
//! server shutdown) and runs the close sequence:
//!
//! 1. abort the remaining tasks
//! 2. close the PTY
//! 3. kill the child
//! 4. wait for it, bounded by the kill grace
//! 5. close the connection
//!
//! The sequence is guarded by a flag on the session, so concurrent or
//! repeated calls are no-ops.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use webterm_core::{ControlFrame, Principal};

use super::bridge::{pump_input, pump_output};
use super::keepalive::{keepalive, KEEPALIVE_INTERVAL};
use super::pty::{resolve_shell, PtyHandle, DEFAULT_COLS, DEFAULT_ROWS};
use crate::config::ServerConfig;
use crate::transport::websocket::{split, WsStream};
use crate::transport::FrameSender;

/// Upper bound on flushing the close frame to a client that stopped reading.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of one terminal connection.
///
/// `Authenticating`, `Upgrading` and `Rejected` belong to the handshake;
/// the supervisor drives the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticating,
    Upgrading,
    Spawning,
    Active,
    Closing,
    Closed,
    Rejected,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// PTY output hit EOF or a read error, usually because the shell exited.
    ProcessExited,
    /// The client sent a close frame or the stream ended.
    ClientClosed,
    /// Reading from the client failed.
    ReadFailed,
    /// Writing to the client failed.
    WriteFailed,
    /// Writing keystrokes to the PTY failed.
    PtyClosed,
    KeepaliveFailed,
    /// Server shutdown.
    Shutdown,
    /// The shell could not be started; no session was created.
    SpawnFailed,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::ProcessExited => "process exited",
            ExitReason::ClientClosed => "client closed",
            ExitReason::ReadFailed => "client read failed",
            ExitReason::WriteFailed => "client write failed",
            ExitReason::PtyClosed => "pty closed",
            ExitReason::KeepaliveFailed => "keepalive failed",
            ExitReason::Shutdown => "server shutdown",
            ExitReason::SpawnFailed => "spawn failed",
        };
        f.write_str(s)
    }
}

/// Per-session settings derived from the server configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Explicit shell; `None` falls back to environment and platform default.
    pub shell: Option<String>,
    pub cwd: Option<PathBuf>,
    pub keepalive_interval: Duration,
    pub kill_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            shell: None,
            cwd: None,
            keepalive_interval: KEEPALIVE_INTERVAL,
            kill_grace: Duration::from_secs(2),
        }
    }
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            cwd: config.cwd.clone(),
            keepalive_interval: config.keepalive_interval,
            kill_grace: config.kill_grace,
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub reason: ExitReason,
    pub pid: Option<u32>,
    /// Exit code of the shell, if it was reaped within the grace period.
    pub exit_code: Option<u32>,
}

/// A live session: one connection, one PTY, one shell.
pub struct TerminalSession {
    id: String,
    username: String,
    pty: Arc<PtyHandle>,
    sender: FrameSender,
    kill_grace: Duration,
    terminated: AtomicBool,
    state: Mutex<SessionState>,
    tasks: Mutex<Vec<AbortHandle>>,
    exit_code: Mutex<Option<u32>>,
}

impl TerminalSession {
    pub fn new(
        id: String,
        username: String,
        pty: Arc<PtyHandle>,
        sender: FrameSender,
        kill_grace: Duration,
    ) -> Self {
        Self {
            id,
            username,
            pty,
            sender,
            kill_grace,
            terminated: AtomicBool::new(false),
            state: Mutex::new(SessionState::Active),
            tasks: Mutex::new(Vec::new()),
            exit_code: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pty(&self) -> &Arc<PtyHandle> {
        &self.pty
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Closed)
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(session_id = %self.id, from = ?*state, to = ?next, "session state");
            *state = next;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code.lock().ok().and_then(|c| *c)
    }

    /// Register a task to be aborted at teardown.
    pub fn track(&self, handle: AbortHandle) {
        if self.is_terminated() {
            handle.abort();
            return;
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    /// Run the close sequence. Returns `true` only for the call that
    /// actually performed it.
    ///
    /// Must not be called from a task registered with [`track`](Self::track),
    /// since that task is aborted in step 1.
    pub async fn teardown(&self, reason: ExitReason) -> bool {
        if self.terminated.swap(true, Ordering::AcqRel) {
            debug!(session_id = %self.id, %reason, "teardown already done");
            return false;
        }

        self.set_state(SessionState::Closing);
        info!(session_id = %self.id, username = %self.username, %reason, "closing terminal session");

        let tasks = self
            .tasks
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for task in tasks {
            task.abort();
        }

        self.pty.close();
        let code = self.pty.terminate(self.kill_grace).await;
        if let Ok(mut exit_code) = self.exit_code.lock() {
            *exit_code = code;
        }

        if tokio::time::timeout(CLOSE_TIMEOUT, self.sender.close())
            .await
            .is_err()
        {
            debug!(session_id = %self.id, "close frame timed out");
        }

        self.set_state(SessionState::Closed);
        info!(
            session_id = %self.id,
            pid = ?self.pty.process_id(),
            exit_code = ?code,
            "terminal session closed"
        );
        true
    }
}

/// Drive one admitted connection from spawn to teardown.
pub async fn run_session(
    ws: WsStream,
    principal: Principal,
    remote: SocketAddr,
    options: SessionOptions,
    mut shutdown: broadcast::Receiver<()>,
) -> SessionOutcome {
    let session_id = generate_session_id();
    let (sender, receiver) = split(ws);
    debug!(session_id = %session_id, to = ?SessionState::Spawning, "session state");

    let shell = resolve_shell(options.shell.as_deref());
    let pty = match PtyHandle::spawn(&shell, options.cwd.as_deref(), DEFAULT_COLS, DEFAULT_ROWS) {
        Ok(pty) => Arc::new(pty),
        Err(e) => {
            warn!(
                session_id = %session_id,
                username = %principal.username,
                shell = %shell,
                error = %e,
                "failed to start terminal"
            );
            let frame = ControlFrame::error(format!("failed to start terminal: {e}"));
            if let Err(e) = sender.send_control(&frame).await {
                debug!(session_id = %session_id, error = %e, "error frame not delivered");
            }
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sender.close()).await;
            debug!(session_id = %session_id, to = ?SessionState::Closed, "session state");
            return SessionOutcome {
                session_id,
                reason: ExitReason::SpawnFailed,
                pid: None,
                exit_code: None,
            };
        }
    };

    let session = Arc::new(TerminalSession::new(
        session_id.clone(),
        principal.username.clone(),
        pty.clone(),
        sender.clone(),
        options.kill_grace,
    ));
    info!(
        session_id = %session_id,
        username = %principal.username,
        remote = %remote,
        pid = ?pty.process_id(),
        shell = %shell,
        "terminal session active"
    );

    let (exit_tx, mut exit_rx) = mpsc::channel::<ExitReason>(3);

    let output = {
        let pty = pty.clone();
        let sender = sender.clone();
        let exit_tx = exit_tx.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let reason = pump_output(&pty, sender, &id).await;
            let _ = exit_tx.send(reason).await;
        })
    };
    session.track(output.abort_handle());

    let input = {
        let pty = pty.clone();
        let sender = sender.clone();
        let exit_tx = exit_tx.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let reason = pump_input(receiver, pty, sender, &id).await;
            let _ = exit_tx.send(reason).await;
        })
    };
    session.track(input.abort_handle());

    let pinger = {
        let sender = sender.clone();
        let exit_tx = exit_tx.clone();
        let id = session_id.clone();
        let period = options.keepalive_interval;
        tokio::spawn(async move {
            let reason = keepalive(sender, period, &id).await;
            let _ = exit_tx.send(reason).await;
        })
    };
    session.track(pinger.abort_handle());
    drop(exit_tx);

    let reason = tokio::select! {
        reason = exit_rx.recv() => reason.unwrap_or(ExitReason::ProcessExited),
        _ = shutdown.recv() => ExitReason::Shutdown,
    };

    session.teardown(reason).await;

    SessionOutcome {
        session_id,
        reason,
        pid: pty.process_id(),
        exit_code: session.exit_code(),
    }
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
