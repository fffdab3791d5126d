use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use craftlink_bridge_core::BridgeRuntime;
use craftlink_bridge_protocol::StatusEvent;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

mod peer;

pub use peer::PeerLink;
use peer::{serve_peer, upgrade, Upgraded};

const REPLACED_REASON: &str = "replaced by a new connection";
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),
    #[error("server task failed: {0}")]
    Join(#[from] JoinError),
}

/// WebSocket endpoint that serves a single active peer at a time.
///
/// A connection only replaces the current peer once its WebSocket handshake
/// has succeeded; the replaced peer is closed and its session torn down
/// before the newcomer is greeted.
pub struct LinkServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<String>>,
    task: JoinHandle<()>,
}

impl LinkServer {
    pub async fn bind(address: &str, runtime: Arc<BridgeRuntime>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let hint = connect_hint(&local_addr);
        info!(address = %local_addr, %hint, "waiting for a peer");
        runtime.status().emit(StatusEvent::Listening {
            address: local_addr.to_string(),
            hint,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, runtime, shutdown_rx));
        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the listener and the active peer, then reports `Stopped`.
    pub async fn stop(mut self, reason: impl Into<String>) -> Result<(), ServerError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(reason.into());
        }
        Ok(self.task.await?)
    }

    /// Serves until `shutdown` yields a reason, then stops. Returns early
    /// with an error if the server task dies on its own.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = String>,
    {
        let reason = tokio::select! {
            finished = &mut self.task => {
                finished?;
                return Ok(());
            }
            reason = shutdown => reason,
        };
        self.stop(reason).await
    }
}

struct ActivePeer {
    close_tx: oneshot::Sender<String>,
    task: JoinHandle<()>,
}

impl ActivePeer {
    async fn close(self, reason: &str) {
        let _ = self.close_tx.send(reason.to_string());
        if let Err(err) = self.task.await {
            warn!(%err, "peer task ended abnormally");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    runtime: Arc<BridgeRuntime>,
    mut shutdown_rx: oneshot::Receiver<String>,
) {
    let status = runtime.status().clone();
    let (upgraded_tx, mut upgraded_rx) = mpsc::unbounded_channel();
    let mut active: Option<ActivePeer> = None;

    let reason = loop {
        tokio::select! {
            requested = &mut shutdown_rx => {
                break requested.unwrap_or_else(|_| "server handle dropped".to_string());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(upgrade(stream, addr, status.clone(), upgraded_tx.clone()));
                }
                Err(err) => {
                    warn!(%err, "failed to accept connection");
                    status.emit(StatusEvent::TransportError { message: err.to_string() });
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(Upgraded { peer, socket }) = upgraded_rx.recv() => {
                if let Some(previous) = active.take() {
                    info!(%peer, "new peer replaces the active connection");
                    previous.close(REPLACED_REASON).await;
                }
                let (close_tx, close_rx) = oneshot::channel();
                let task = tokio::spawn(serve_peer(
                    socket,
                    peer,
                    Arc::clone(&runtime),
                    close_rx,
                ));
                active = Some(ActivePeer { close_tx, task });
            }
        }
    };

    drop(listener);
    if let Some(previous) = active.take() {
        previous.close(&reason).await;
    }
    info!(%reason, "server stopped");
    status.emit(StatusEvent::Stopped { reason });
}

/// The `/wsserver` command players type in game to reach this bridge.
pub fn connect_hint(address: &SocketAddr) -> String {
    if address.ip().is_unspecified() {
        format!("/wsserver localhost:{}", address.port())
    } else {
        format!("/wsserver {address}")
    }
}
