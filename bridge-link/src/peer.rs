use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use craftlink_bridge_core::{BridgeRuntime, FrameSink, LinkError, StatusReporter};
use craftlink_bridge_protocol::StatusEvent;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const INVALID_TEXT_REASON: &str = "invalid UTF-8 in text frame";

pub(crate) type PeerSocket = WebSocketStream<TcpStream>;

/// A connection that completed the WebSocket upgrade.
pub(crate) struct Upgraded {
    pub(crate) peer: SocketAddr,
    pub(crate) socket: PeerSocket,
}

/// Outbound handle for one connected peer.
///
/// Frames are queued on an unbounded channel and written by the peer task,
/// so `send_text` never blocks the caller. Once the peer is gone every send
/// reports `NotConnected`.
#[derive(Debug)]
pub struct PeerLink {
    outbound: mpsc::UnboundedSender<Message>,
    open: AtomicBool,
}

impl PeerLink {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            outbound,
            open: AtomicBool::new(true),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl FrameSink for PeerLink {
    fn send_text(&self, frame: String) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::NotConnected);
        }
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| LinkError::NotConnected)
    }
}

/// Runs the WebSocket handshake for a raw TCP connection and hands the
/// upgraded socket to the accept loop. Failed or stalled handshakes are
/// reported and dropped without touching the active peer.
pub(crate) async fn upgrade(
    stream: TcpStream,
    peer: SocketAddr,
    status: StatusReporter,
    upgraded_tx: mpsc::UnboundedSender<Upgraded>,
) {
    let message = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::accept_async(stream),
    )
    .await
    {
        Ok(Ok(socket)) => {
            let _ = upgraded_tx.send(Upgraded { peer, socket });
            return;
        }
        Ok(Err(err)) => err.to_string(),
        Err(_) => format!("handshake timed out after {}s", HANDSHAKE_TIMEOUT.as_secs()),
    };
    warn!(%peer, error = %message, "websocket handshake failed");
    status.emit(StatusEvent::TransportError { message });
}

pub(crate) async fn serve_peer(
    socket: PeerSocket,
    peer: SocketAddr,
    runtime: Arc<BridgeRuntime>,
    mut close_rx: oneshot::Receiver<String>,
) {
    let status = runtime.status().clone();
    info!(%peer, "peer connected");
    status.emit(StatusEvent::Connected {
        peer: peer.to_string(),
    });

    let (mut writer, mut reader) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let link = Arc::new(PeerLink::new(outbound_tx));
    let session = runtime.open_session(link.clone());
    if let Err(err) = session.start() {
        warn!(%peer, %err, "failed to start session");
    }

    let (code, reason) = loop {
        tokio::select! {
            requested = &mut close_rx => {
                let reason = requested.unwrap_or_else(|_| "server dropped".to_string());
                let _ = writer.send(Message::Close(None)).await;
                break (None, reason);
            }
            Some(frame) = outbound_rx.recv() => {
                if let Err(err) = writer.send(frame).await {
                    warn!(%peer, %err, "failed to write frame");
                    status.emit(StatusEvent::TransportError { message: err.to_string() });
                    break (None, err.to_string());
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let disposition = session.handle_frame(&text);
                    trace!(%peer, ?disposition, "frame handled");
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|frame| u16::from(frame.code));
                    let reason = frame
                        .map(|frame| frame.reason.into_owned())
                        .unwrap_or_default();
                    break (code, reason);
                }
                Some(Ok(other)) => {
                    debug!(%peer, kind = ?other, "ignoring non-text frame");
                }
                // The reader is fused after any error, so an undecodable text
                // frame fails this peer with 1007 instead of a transport error.
                Some(Err(WsError::Utf8)) => {
                    warn!(%peer, reason = INVALID_TEXT_REASON, "dropping malformed frame");
                    let close = CloseFrame {
                        code: CloseCode::Invalid,
                        reason: INVALID_TEXT_REASON.into(),
                    };
                    let _ = writer.send(Message::Close(Some(close))).await;
                    break (Some(u16::from(CloseCode::Invalid)), INVALID_TEXT_REASON.to_string());
                }
                Some(Err(err)) => {
                    warn!(%peer, %err, "transport error");
                    status.emit(StatusEvent::TransportError { message: err.to_string() });
                    break (None, err.to_string());
                }
                None => break (None, "stream ended".to_string()),
            }
        }
    };

    link.mark_closed();
    drop(outbound_rx);
    info!(%peer, ?code, %reason, "peer disconnected");
    status.emit(StatusEvent::Disconnected { code, reason });

    let failed = session.close();
    if failed > 0 {
        info!(%peer, failed, "failed pending batches on disconnect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_queues_text_frames_until_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = PeerLink::new(tx);

        link.send_text("{}".to_string()).expect("open link accepts frames");
        assert_eq!(rx.try_recv().expect("queued frame"), Message::Text("{}".to_string()));

        link.mark_closed();
        assert_eq!(link.send_text("{}".to_string()), Err(LinkError::NotConnected));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_fails_once_writer_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = PeerLink::new(tx);
        drop(rx);

        assert_eq!(link.send_text("{}".to_string()), Err(LinkError::NotConnected));
    }
}
