//! WebSocket client transport.
//!
//! One spawned I/O task owns the socket and selects over:
//!
//! - Incoming frames from the remote end
//! - Outgoing frames queued by [`WebSocketTransport::send`]
//! - A shutdown request from [`WebSocketTransport::close`]

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{Transport, TransportEvent, TransportHandler};

// ============================================================================
// Types
// ============================================================================

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Internal commands for the I/O loop.
enum SocketCommand {
    /// Write a frame and report the outcome.
    Send {
        text: String,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Close the socket.
    Shutdown,
}

/// Parts held between `connect` and `start`.
struct Pending {
    socket: Socket,
    command_rx: mpsc::UnboundedReceiver<SocketCommand>,
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket connection to a BiDi endpoint.
pub struct WebSocketTransport {
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    pending: Mutex<Option<Pending>>,
    closed: AtomicBool,
}

impl WebSocketTransport {
    /// Opens a WebSocket to `url`.
    ///
    /// The I/O loop starts when the transport is handed to a connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL scheme is not `ws` or `wss`
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(url: &Url) -> Result<Self> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "unsupported WebSocket scheme: {}",
                url.scheme()
            )));
        }

        let (socket, _response) = connect_async(url.as_str()).await?;
        debug!(%url, "WebSocket connected");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Ok(Self {
            command_tx,
            pending: Mutex::new(Some(Pending { socket, command_rx })),
            closed: AtomicBool::new(false),
        })
    }

    /// I/O loop that owns the socket.
    async fn run_io_loop(
        socket: Socket,
        mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
        handler: TransportHandler,
    ) {
        let (mut ws_write, mut ws_read) = socket.split();

        let reason = loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            handler(TransportEvent::Message(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => handler(TransportEvent::Message(text)),
                            Err(_) => warn!(len = bytes.len(), "Dropping non UTF-8 binary frame"),
                        },

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break "WebSocket closed by remote".to_string();
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break format!("WebSocket error: {e}");
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break "WebSocket stream ended".to_string();
                        }

                        // Ignore Ping, Pong, Frame
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(SocketCommand::Send { text, ack }) => {
                            let result = ws_write
                                .send(Message::Text(text.into()))
                                .await
                                .map_err(|e| Error::connection(e.to_string()));
                            let _ = ack.send(result);
                        }

                        Some(SocketCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break "Connection closed by client".to_string();
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break "Transport dropped".to_string();
                        }
                    }
                }
            }
        };

        // Reject sends that raced the shutdown.
        command_rx.close();
        while let Ok(command) = command_rx.try_recv() {
            if let SocketCommand::Send { ack, .. } = command {
                let _ = ack.send(Err(Error::ConnectionClosed));
            }
        }

        handler(TransportEvent::Closed { reason });
        debug!("WebSocket I/O loop terminated");
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn start(&self, handler: TransportHandler) -> Result<()> {
        let Pending { socket, command_rx } = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| Error::connection("WebSocket transport already started"))?;

        tokio::spawn(Self::run_io_loop(socket, command_rx, handler));
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let (ack, ack_rx) = oneshot::channel();
        self.command_tx
            .send(SocketCommand::Send { text: message, ack })
            .map_err(|_| Error::ConnectionClosed)?;

        ack_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.command_tx.send(SocketCommand::Shutdown);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let url = Url::parse("http://127.0.0.1:9222/session").expect("url");
        let result = WebSocketTransport::connect(&url).await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}/session")).expect("url");
        let result = WebSocketTransport::connect(&url).await;
        assert!(result.is_err());
    }
}
