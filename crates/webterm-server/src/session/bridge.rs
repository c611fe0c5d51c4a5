//! The two one-directional copy loops of a session.
//!
//! Output and input run as separate tasks so a burst in one direction never
//! stalls the other. Each returns the [`ExitReason`] that ended it; neither
//! tears anything down itself.

use std::io::Read;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webterm_core::{parse_inbound, ControlFrame, Inbound};

use super::pty::PtyHandle;
use super::supervisor::ExitReason;
use crate::transport::{FrameReceiver, FrameSender};

/// Bytes read from the PTY per output frame.
pub const OUTPUT_CHUNK: usize = 4096;

/// Chunks buffered between the reader thread and the socket.
const OUTPUT_QUEUE: usize = 64;

/// PTY output -> connection.
///
/// A dedicated thread performs the blocking reads; chunks are forwarded in
/// read order as binary frames.
pub async fn pump_output(pty: &PtyHandle, sender: FrameSender, session_id: &str) -> ExitReason {
    let Some(reader) = pty.take_reader() else {
        debug!(session_id, "PTY reader already taken");
        return ExitReason::ProcessExited;
    };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTPUT_QUEUE);
    let spawned = std::thread::Builder::new()
        .name(format!("pty-reader-{session_id}"))
        .spawn(move || read_pty(reader, tx));
    if let Err(e) = spawned {
        info!(session_id, error = %e, "could not start PTY reader thread");
        return ExitReason::ProcessExited;
    }

    while let Some(chunk) = rx.recv().await {
        if let Err(e) = sender.send_output(chunk).await {
            info!(session_id, error = %e, "output write to client failed");
            return ExitReason::WriteFailed;
        }
    }

    info!(session_id, "terminal output ended");
    ExitReason::ProcessExited
}

/// Blocking read loop. Ends on EOF, on a read error (EIO once the child is
/// gone) or when the async side has stopped listening.
fn read_pty(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; OUTPUT_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "PTY read ended");
                break;
            }
        }
    }
}

/// Connection -> PTY, with control-frame dispatch.
pub async fn pump_input(
    mut receiver: FrameReceiver,
    pty: Arc<PtyHandle>,
    sender: FrameSender,
    session_id: &str,
) -> ExitReason {
    loop {
        let payload = match receiver.next_payload().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!(session_id, "client closed the connection");
                return ExitReason::ClientClosed;
            }
            Err(e) => {
                info!(session_id, error = %e, "client read failed");
                return ExitReason::ReadFailed;
            }
        };

        let keystrokes = match parse_inbound(&payload) {
            Inbound::Control(ControlFrame::Input { data }) => data.into_bytes(),
            Inbound::Control(ControlFrame::Resize { cols, rows }) => {
                match pty.resize(cols, rows) {
                    Ok(true) => debug!(session_id, cols, rows, "resized"),
                    Ok(false) => debug!(session_id, cols, rows, "ignoring non-positive resize"),
                    Err(e) => debug!(session_id, error = %e, "resize failed"),
                }
                continue;
            }
            Inbound::Control(ControlFrame::Ping) => {
                if let Err(e) = sender.send_control(&ControlFrame::Pong).await {
                    info!(session_id, error = %e, "pong write failed");
                    return ExitReason::WriteFailed;
                }
                continue;
            }
            Inbound::Control(frame @ (ControlFrame::Pong | ControlFrame::Error { .. })) => {
                debug!(session_id, ?frame, "ignoring server-only frame from client");
                continue;
            }
            Inbound::Unrecognized(reason) => {
                debug!(session_id, reason = %reason, "dropping unrecognized control frame");
                continue;
            }
            Inbound::Raw(bytes) => bytes,
        };

        if keystrokes.is_empty() {
            continue;
        }
        if let Err(e) = pty.write(keystrokes).await {
            info!(session_id, error = %e, "PTY write failed");
            return ExitReason::PtyClosed;
        }
    }
}
