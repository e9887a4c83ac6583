//! In-memory transport pair.
//!
//! [`channel_pair`] returns a [`ChannelTransport`] for the client side and a
//! [`ChannelRemote`] that plays the remote end. Useful for embedding a
//! remote end in-process and for tests.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

use super::{Transport, TransportEvent, TransportHandler};

// ============================================================================
// Types
// ============================================================================

/// Frame travelling from the remote side to the client.
#[derive(Debug)]
enum RemoteFrame {
    Text(String),
    Close(String),
}

/// Creates a connected transport and remote end.
#[must_use]
pub fn channel_pair() -> (ChannelTransport, ChannelRemote) {
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
    let (to_remote_tx, to_remote_rx) = mpsc::unbounded_channel();

    let transport = ChannelTransport {
        outgoing: Mutex::new(Some(to_remote_tx)),
        incoming: Mutex::new(Some(to_client_rx)),
        loopback: to_client_tx.clone(),
        closed: Arc::new(AtomicBool::new(false)),
    };

    let remote = ChannelRemote {
        sender: RemoteSender { tx: to_client_tx },
        rx: to_remote_rx,
    };

    (transport, remote)
}

// ============================================================================
// ChannelTransport
// ============================================================================

/// Client half of an in-memory link.
pub struct ChannelTransport {
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<RemoteFrame>>>,
    loopback: mpsc::UnboundedSender<RemoteFrame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for ChannelTransport {
    fn start(&self, handler: TransportHandler) -> Result<()> {
        let mut rx = self
            .incoming
            .lock()
            .take()
            .ok_or_else(|| Error::connection("channel transport already started"))?;
        let closed = Arc::clone(&self.closed);

        tokio::spawn(async move {
            let reason = loop {
                match rx.recv().await {
                    Some(RemoteFrame::Text(text)) => handler(TransportEvent::Message(text)),
                    Some(RemoteFrame::Close(reason)) => break reason,
                    None => break "Remote end dropped".to_string(),
                }
            };

            closed.store(true, Ordering::SeqCst);
            debug!(%reason, "Channel transport closed");
            handler(TransportEvent::Closed { reason });
        });

        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let guard = self.outgoing.lock();
        let tx = guard.as_ref().ok_or(Error::ConnectionClosed)?;
        tx.send(message).map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.outgoing.lock().take();
        let _ = self
            .loopback
            .send(RemoteFrame::Close("Connection closed by client".to_string()));
    }
}

// ============================================================================
// ChannelRemote
// ============================================================================

/// Remote half of an in-memory link.
///
/// Reads what the client sent and pushes responses and events back. The
/// sending side can be cloned out with [`ChannelRemote::sender`] so that
/// events can be injected while another task answers commands.
pub struct ChannelRemote {
    sender: RemoteSender,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelRemote {
    /// Receives the next client frame as text.
    ///
    /// Returns `None` once the client side is closed or dropped.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receives the next client frame parsed as JSON.
    ///
    /// Frames that are not valid JSON are skipped.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let text = self.rx.recv().await?;
            if let Ok(value) = serde_json::from_str(&text) {
                return Some(value);
            }
        }
    }

    /// Returns a cloneable sending handle.
    #[inline]
    #[must_use]
    pub fn sender(&self) -> RemoteSender {
        self.sender.clone()
    }
}

impl std::ops::Deref for ChannelRemote {
    type Target = RemoteSender;

    fn deref(&self) -> &Self::Target {
        &self.sender
    }
}

// ============================================================================
// RemoteSender
// ============================================================================

/// Sending side of a [`ChannelRemote`].
///
/// All methods return `false` once the client side is gone.
#[derive(Clone)]
pub struct RemoteSender {
    tx: mpsc::UnboundedSender<RemoteFrame>,
}

impl RemoteSender {
    /// Sends a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(RemoteFrame::Text(text.into())).is_ok()
    }

    /// Sends a JSON frame.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Answers a command with a success result.
    pub fn respond(&self, id: CommandId, result: Value) -> bool {
        self.send_json(&json!({"type": "success", "id": id, "result": result}))
    }

    /// Answers a command with an error envelope.
    pub fn respond_error(&self, id: CommandId, error: &str, message: &str) -> bool {
        self.send_json(&json!({
            "type": "error",
            "id": id,
            "error": error,
            "message": message,
        }))
    }

    /// Emits an event.
    pub fn emit(&self, method: &str, params: Value) -> bool {
        self.send_json(&json!({"type": "event", "method": method, "params": params}))
    }

    /// Closes the link from the remote side.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        self.tx.send(RemoteFrame::Close(reason.into())).is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut remote) = channel_pair();
        let (events_tx, mut events_rx) = unbounded_channel();
        transport
            .start(Arc::new(move |event| {
                let _ = events_tx.send(event);
            }))
            .expect("start");

        transport.send("{\"id\":1}".to_string()).await.expect("send");
        assert_eq!(remote.recv().await, Some(json!({"id": 1})));

        assert!(remote.emit("log.entryAdded", json!({})));
        let Some(TransportEvent::Message(text)) = events_rx.recv().await else {
            panic!("expected message");
        };
        assert!(text.contains("log.entryAdded"));
    }

    #[tokio::test]
    async fn test_remote_close_is_delivered_once() {
        let (transport, remote) = channel_pair();
        let (events_tx, mut events_rx) = unbounded_channel();
        transport
            .start(Arc::new(move |event| {
                let _ = events_tx.send(event);
            }))
            .expect("start");

        remote.close("bye");
        assert_eq!(
            events_rx.recv().await,
            Some(TransportEvent::Closed {
                reason: "bye".to_string()
            })
        );

        assert!(matches!(
            transport.send("x".to_string()).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_client_close_ends_remote_stream() {
        let (transport, mut remote) = channel_pair();
        transport.start(Arc::new(|_| {})).expect("start");

        transport.close().await;
        transport.close().await;
        assert_eq!(remote.recv_text().await, None);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (transport, _remote) = channel_pair();
        transport.start(Arc::new(|_| {})).expect("start");
        assert!(transport.start(Arc::new(|_| {})).is_err());
    }
}
