//! PTY wrapper using portable-pty.
//!
//! Resolves the shell, opens a pseudo-terminal with it attached, and exposes
//! write, resize and terminate operations.
//!
//! Keystrokes reach the terminal through a dedicated writer thread fed by a
//! bounded channel. A write into a full tty input queue blocks only that
//! thread; async code never waits on it, so teardown can always proceed to
//! killing the child.

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webterm_core::{CoreError, CoreResult};

/// Initial window size, applied before any data flows.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Environment variable overriding the shell executable.
pub const SHELL_ENV: &str = "WEBTERM_SHELL";

const REAP_POLL: Duration = Duration::from_millis(20);

/// Keystroke chunks queued ahead of the writer thread.
const INPUT_QUEUE: usize = 64;

/// Resolve the shell executable: explicit override, then the environment,
/// then the platform default.
pub fn resolve_shell(override_shell: Option<&str>) -> String {
    resolve_shell_with(override_shell, |key| std::env::var(key).ok())
}

fn resolve_shell_with<F>(override_shell: Option<&str>, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |s: String| if s.trim().is_empty() { None } else { Some(s) };

    if let Some(shell) = override_shell.map(str::to_string).and_then(non_empty) {
        return shell;
    }
    if let Some(shell) = env(SHELL_ENV).and_then(non_empty) {
        return shell;
    }

    if cfg!(windows) {
        return env("COMSPEC")
            .and_then(non_empty)
            .unwrap_or_else(|| "cmd.exe".to_string());
    }

    if let Some(shell) = env("SHELL").and_then(non_empty) {
        return shell;
    }
    if Path::new("/bin/bash").exists() {
        "/bin/bash".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

/// A shell running on the subordinate side of a pseudo-terminal.
pub struct PtyHandle {
    /// Master side, kept for resize/size queries. `None` once closed.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    /// Feeds the writer thread. `None` once closed.
    input: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    /// Output side of the master, handed out once to the output loop.
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    pid: Option<u32>,
    shell: String,
}

impl PtyHandle {
    /// Spawn `shell` on a fresh PTY of the given size.
    ///
    /// The working directory defaults to the user's home directory.
    pub fn spawn(shell: &str, cwd: Option<&Path>, cols: u16, rows: u16) -> CoreResult<Self> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| CoreError::Pty(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let dir: Option<PathBuf> = cwd.map(Path::to_path_buf).or_else(dirs::home_dir);
        if let Some(dir) = dir.filter(|d| d.is_dir()) {
            cmd.cwd(dir);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CoreError::Pty(format!("failed to spawn {shell}: {e}")))?;

        // Only the child keeps the subordinate side open; EOF on the master
        // then tracks the child's lifetime.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CoreError::Pty(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CoreError::Pty(format!("failed to take PTY writer: {e}")))?;

        let pid = child.process_id();

        let (input, queue) = mpsc::channel::<Vec<u8>>(INPUT_QUEUE);
        let spawned = std::thread::Builder::new()
            .name(format!("pty-writer-{}", pid.unwrap_or_default()))
            .spawn(move || write_pty(writer, queue));
        if let Err(e) = spawned {
            let _ = child.kill();
            return Err(CoreError::Pty(format!("failed to start PTY writer thread: {e}")));
        }

        info!(shell, pid = ?pid, cols, rows, "PTY spawned");

        Ok(Self {
            master: Mutex::new(Some(pair.master)),
            input: Mutex::new(Some(input)),
            reader: Mutex::new(Some(reader)),
            child: Arc::new(Mutex::new(child)),
            pid,
            shell: shell.to_string(),
        })
    }

    /// Take the blocking output reader. Only the first call returns it.
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        self.reader.lock().ok().and_then(|mut r| r.take())
    }

    /// Queue bytes for the terminal.
    ///
    /// Waits while the queue is full, which makes the caller feel the tty's
    /// backpressure. Cancelling the future is always safe.
    pub async fn write(&self, data: Vec<u8>) -> CoreResult<()> {
        let input = self
            .input
            .lock()
            .ok()
            .and_then(|input| input.clone())
            .ok_or_else(|| CoreError::Pty("PTY closed".into()))?;
        input
            .send(data)
            .await
            .map_err(|_| CoreError::Pty("PTY writer stopped".into()))
    }

    /// Resize the terminal. Returns `false` (and does nothing) unless both
    /// dimensions are positive.
    pub fn resize(&self, cols: i64, rows: i64) -> CoreResult<bool> {
        if cols <= 0 || rows <= 0 {
            return Ok(false);
        }
        let size = PtySize {
            rows: clamp_dim(rows),
            cols: clamp_dim(cols),
            pixel_width: 0,
            pixel_height: 0,
        };
        let master = self
            .master
            .lock()
            .map_err(|_| CoreError::Pty("PTY master lock poisoned".into()))?;
        let master = master
            .as_ref()
            .ok_or_else(|| CoreError::Pty("PTY closed".into()))?;
        master
            .resize(size)
            .map_err(|e| CoreError::Pty(format!("PTY resize failed: {e}")))?;
        debug!(cols = size.cols, rows = size.rows, "PTY resized");
        Ok(true)
    }

    /// Current terminal size as `(cols, rows)`.
    pub fn size(&self) -> CoreResult<(u16, u16)> {
        let master = self
            .master
            .lock()
            .map_err(|_| CoreError::Pty("PTY master lock poisoned".into()))?;
        let master = master
            .as_ref()
            .ok_or_else(|| CoreError::Pty("PTY closed".into()))?;
        let size = master
            .get_size()
            .map_err(|e| CoreError::Pty(format!("PTY size query failed: {e}")))?;
        Ok((size.cols, size.rows))
    }

    pub fn process_id(&self) -> Option<u32> {
        self.pid
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Stop accepting input and drop the master side.
    ///
    /// Never blocks: a writer thread stuck in a full tty queue keeps its
    /// descriptor until the child is gone, then exits on the write error.
    pub fn close(&self) {
        if let Ok(mut input) = self.input.lock() {
            input.take();
        }
        if let Ok(mut master) = self.master.lock() {
            master.take();
        }
    }

    /// Kill the child and wait up to `grace` for it to be reaped.
    ///
    /// Returns the exit code if the child was reaped in time.
    pub async fn terminate(&self, grace: Duration) -> Option<u32> {
        // portable-pty's kill escalates from SIGHUP to SIGKILL with short
        // sleeps in between, so it runs off the async workers.
        let child = self.child.clone();
        let pid = self.pid;
        let already_exited = tokio::task::spawn_blocking(move || {
            let mut child = match child.lock() {
                Ok(child) => child,
                Err(_) => {
                    warn!(pid = ?pid, "child lock poisoned, cannot terminate");
                    return None;
                }
            };
            if let Ok(Some(status)) = child.try_wait() {
                return Some(status.exit_code());
            }
            if let Err(e) = child.kill() {
                debug!(pid = ?pid, error = %e, "kill failed");
            }
            None
        })
        .await
        .ok()
        .flatten();

        if let Some(code) = already_exited {
            debug!(pid = ?self.pid, code, "child already exited");
            return Some(code);
        }

        let deadline = Instant::now() + grace;
        loop {
            let status = match self.child.lock() {
                Ok(mut child) => child.try_wait(),
                Err(_) => return None,
            };
            match status {
                Ok(Some(status)) => {
                    debug!(pid = ?self.pid, code = status.exit_code(), "child reaped");
                    return Some(status.exit_code());
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(pid = ?self.pid, error = %e, "wait on child failed");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                warn!(pid = ?self.pid, grace_ms = grace.as_millis() as u64, "child not reaped within grace period");
                return None;
            }
            tokio::time::sleep(REAP_POLL).await;
        }
    }
}

/// Blocking write loop. Ends when the queue closes or a write fails (EIO
/// once the child side is gone).
fn write_pty(mut writer: Box<dyn Write + Send>, mut queue: mpsc::Receiver<Vec<u8>>) {
    while let Some(data) = queue.blocking_recv() {
        if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
            debug!(error = %e, "PTY write ended");
            break;
        }
    }
}

fn clamp_dim(v: i64) -> u16 {
    v.clamp(1, u16::MAX as i64) as u16
}
