//! Terminal sessions: PTY lifecycle, streaming bridge, keepalive, supervision.

pub mod bridge;
pub mod keepalive;
pub mod pty;
pub mod supervisor;

pub use pty::{resolve_shell, PtyHandle, DEFAULT_COLS, DEFAULT_ROWS};
pub use supervisor::{
    run_session, ExitReason, SessionOptions, SessionOutcome, SessionState, TerminalSession,
};
