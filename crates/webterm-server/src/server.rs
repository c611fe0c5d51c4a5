//! Core server: accepts TCP connections and runs each through the gated
//! upgrade and, if admitted, a terminal session.
//!
//! Owns the listener, the connection gate and the shutdown broadcast every
//! live session subscribes to.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use webterm_core::{CoreError, CoreResult, PrincipalValidator};

use crate::auth::{ConnectionGate, OriginPolicy};
use crate::config::ServerConfig;
use crate::session::{run_session, SessionOptions, SessionState};
use crate::transport::websocket::accept_terminal;

/// Time allowed for a client to complete the HTTP upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for live sessions to finish teardown after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The terminal bridge server.
pub struct TerminalServer {
    config: ServerConfig,
    gate: ConnectionGate,
    listener: TcpListener,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

/// Cloneable trigger for stopping a running [`TerminalServer`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Stop accepting connections and tear down every live session.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl TerminalServer {
    /// Bind the listener. Nothing is accepted until [`run`](Self::run).
    pub async fn bind(
        config: ServerConfig,
        validator: Arc<dyn PrincipalValidator>,
    ) -> CoreResult<Self> {
        let listener = TcpListener::bind(config.bind).await.map_err(|e| {
            CoreError::Transport(format!("failed to bind {}: {e}", config.bind))
        })?;

        let gate = ConnectionGate::new(
            config.path.clone(),
            OriginPolicy::new(&config.allowed_origins),
            validator,
        );

        Ok(Self {
            config,
            gate,
            listener,
            shutdown_tx: broadcast::channel(1).0,
        })
    }

    pub fn local_addr(&self) -> CoreResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept connections until shutdown is triggered, then wait (bounded)
    /// for live sessions to tear down.
    pub async fn run(self) -> CoreResult<()> {
        let server = Arc::new(self);
        let mut shutdown_rx = server.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        info!(
            addr = %server.local_addr()?,
            path = %server.config.path,
            origins = ?server.config.allowed_origins,
            "webterm-server ready"
        );

        loop {
            tokio::select! {
                accepted = server.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let srv = server.clone();
                        let session_shutdown = server.shutdown_tx.subscribe();
                        connections.spawn(async move {
                            srv.handle_connection(stream, remote, session_shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested, closing listener");
                    break;
                }
            }
        }

        let live = connections.len();
        if live > 0 {
            info!(live, "waiting for sessions to close");
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(remaining = connections.len(), "sessions still open after drain timeout");
                connections.abort_all();
            }
        }

        info!("webterm-server stopped");
        Ok(())
    }

    /// Gate, upgrade and serve one connection.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
        shutdown: broadcast::Receiver<()>,
    ) {
        debug!(remote = %remote, state = ?SessionState::Authenticating, "connection accepted");

        let handshake = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            accept_terminal(stream, remote, &self.gate, self.config.max_frame_bytes),
        )
        .await
        .unwrap_or_else(|_| Err(CoreError::Timeout));

        let (ws, principal) = match handshake {
            Ok(admitted) => admitted,
            Err(CoreError::PermissionDenied(reason)) => {
                debug!(remote = %remote, state = ?SessionState::Rejected, reason = %reason, "upgrade rejected");
                return;
            }
            Err(e) => {
                debug!(remote = %remote, error = %e, "upgrade failed");
                return;
            }
        };

        debug!(
            remote = %remote,
            username = %principal.username,
            state = ?SessionState::Upgrading,
            "upgrade complete"
        );

        let outcome = run_session(
            ws,
            principal,
            remote,
            SessionOptions::from(&self.config),
            shutdown,
        )
        .await;

        info!(
            session_id = %outcome.session_id,
            remote = %remote,
            reason = %outcome.reason,
            exit_code = ?outcome.exit_code,
            "session finished"
        );
    }
}
