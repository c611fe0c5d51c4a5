//! WebSocket transport using tokio-tungstenite.
//!
//! The upgrade runs the [`ConnectionGate`] inside the handshake callback, so
//! a rejected request gets a plain HTTP error and never reaches `101`.
//! After the upgrade the stream is split: [`FrameSender`] is the single,
//! mutex-guarded write path shared by every task of a session, and
//! [`FrameReceiver`] is owned by the input loop.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use webterm_core::{ControlFrame, CoreError, CoreResult, Principal};

use crate::auth::{ConnectionGate, Rejection};

pub type WsStream = WebSocketStream<TcpStream>;

/// Perform the gated WebSocket handshake on an accepted TCP stream.
///
/// Returns the upgraded stream and the admitted principal. A gate rejection
/// is reported as [`CoreError::PermissionDenied`] after the HTTP error
/// response has been written.
pub async fn accept_terminal(
    stream: TcpStream,
    remote: SocketAddr,
    gate: &ConnectionGate,
    max_frame_bytes: usize,
) -> CoreResult<(WsStream, Principal)> {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_frame_bytes);
    config.max_frame_size = Some(max_frame_bytes);

    let mut admitted: Option<Principal> = None;
    let mut rejected: Option<Rejection> = None;

    let callback = |req: &Request, resp: Response| match gate.check(req, remote) {
        Ok(principal) => {
            admitted = Some(principal);
            Ok(resp)
        }
        Err(rejection) => {
            rejected = Some(rejection.clone());
            Err(rejection.into_response())
        }
    };

    let result = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config)).await;

    match (result, admitted, rejected) {
        (Ok(ws), Some(principal), _) => Ok((ws, principal)),
        (_, _, Some(rejection)) => Err(CoreError::PermissionDenied(format!("{rejection:?}"))),
        (Ok(_), None, None) => Err(CoreError::Transport(
            "handshake completed without gate decision".into(),
        )),
        (Err(e), _, None) => Err(CoreError::Transport(format!("WS handshake failed: {e}"))),
    }
}

/// Serialized write half of a terminal connection.
///
/// Cloned into the output loop, the input loop and the keepalive task; the
/// mutex keeps their frames from interleaving.
#[derive(Clone)]
pub struct FrameSender {
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
}

impl FrameSender {
    async fn send(&self, msg: Message) -> CoreResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(msg)
            .await
            .map_err(|e| CoreError::Transport(format!("WS send failed: {e}")))
    }

    /// Forward raw terminal output as one binary frame.
    pub async fn send_output(&self, data: Vec<u8>) -> CoreResult<()> {
        self.send(Message::Binary(data.into())).await
    }

    /// Send a JSON control frame as text.
    pub async fn send_control(&self, frame: &ControlFrame) -> CoreResult<()> {
        let json = frame.to_json()?;
        self.send(Message::Text(json.into())).await
    }

    /// Transport-level liveness probe.
    pub async fn send_ping(&self) -> CoreResult<()> {
        self.send(Message::Ping(Vec::new().into())).await
    }

    /// Send a close frame and shut the sink. Errors are irrelevant here: the
    /// peer may already be gone.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "WS close frame not sent");
        }
        let _ = sink.close().await;
    }
}

/// Read half of a terminal connection.
pub struct FrameReceiver {
    stream: SplitStream<WsStream>,
}

impl FrameReceiver {
    /// Next text or binary payload.
    ///
    /// Returns `None` when the peer closed the connection. Transport pings
    /// are answered by tungstenite itself and skipped here along with pongs.
    pub async fn next_payload(&mut self) -> CoreResult<Option<Vec<u8>>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(CoreError::Transport(format!("WS recv failed: {e}")));
                }
                None => return Ok(None),
            }
        }
    }
}

/// Split an upgraded stream into its send and receive halves.
pub fn split(ws: WsStream) -> (FrameSender, FrameReceiver) {
    let (sink, stream) = ws.split();
    (
        FrameSender {
            sink: Arc::new(Mutex::new(sink)),
        },
        FrameReceiver { stream },
    )
}
