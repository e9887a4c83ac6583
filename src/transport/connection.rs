//! Command correlation and event dispatch.
//!
//! The connection sits between a [`Transport`] and the browser object tree:
//!
//! - Allocates command ids and correlates responses by id
//! - Applies per-command timeouts
//! - Parses events once and fans them out to listeners by method name
//! - Rejects everything still pending when the link closes
//!
//! # Ordering
//!
//! Responses settle in completion order. Events are delivered in arrival
//! order, to listeners in registration order, synchronously on the
//! transport's delivery task.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, ListenerId};
use crate::protocol::{Command, CommandFrame, Event, Incoming, ParsedEvent};

use super::tap::{FrameDirection, FrameTap};
use super::{Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Event listener callback.
pub type EventListener = Arc<dyn Fn(&ParsedEvent) + Send + Sync>;

/// Close listener callback, called once with the close reason.
pub type CloseListener = Box<dyn FnOnce(&str) + Send>;

/// One in-flight command.
struct PendingCommand {
    method: String,
    issued_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

/// Map of command ids to in-flight commands.
type CorrelationMap = FxHashMap<CommandId, PendingCommand>;

/// Map of event names to ordered listeners.
type ListenerMap = FxHashMap<String, Vec<(ListenerId, EventListener)>>;

// ============================================================================
// Connection
// ============================================================================

/// A multiplexed BiDi connection.
///
/// Cheap to clone; all clones share the same correlation table and
/// listeners.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: Mutex<CorrelationMap>,
    listeners: Mutex<ListenerMap>,
    close_listeners: Mutex<Vec<CloseListener>>,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,
    command_timeout: Duration,
    tap: Option<Arc<dyn FrameTap>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection and starts the transport.
    ///
    /// A zero `command_timeout` disables the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to start.
    pub fn new(
        transport: Arc<dyn Transport>,
        command_timeout: Duration,
        tap: Option<Arc<dyn FrameTap>>,
    ) -> Result<Self> {
        let inner = Arc::new(ConnectionInner {
            transport: Arc::clone(&transport),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(CorrelationMap::default()),
            listeners: Mutex::new(ListenerMap::default()),
            close_listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            command_timeout,
            tap,
        });

        let weak: Weak<ConnectionInner> = Arc::downgrade(&inner);
        transport.start(Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_transport_event(event);
            }
        }))?;

        Ok(Self { inner })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sends a typed command with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the remote end answered with an error
    /// - [`Error::CommandTimeout`] if no response arrived in time
    /// - [`Error::ConnectionClosed`] if the connection is or becomes closed
    pub async fn send(&self, command: impl Into<Command>) -> Result<Value> {
        let (method, params) = command.into().into_parts()?;
        self.send_raw_with_timeout(&method, params, Some(self.inner.command_timeout))
            .await
    }

    /// Sends a typed command with a custom timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_with_timeout(
        &self,
        command: impl Into<Command>,
        command_timeout: Duration,
    ) -> Result<Value> {
        let (method, params) = command.into().into_parts()?;
        self.send_raw_with_timeout(&method, params, Some(command_timeout))
            .await
    }

    /// Sends a command by method name with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_raw(&self, method: &str, params: Value) -> Result<Value> {
        self.send_raw_with_timeout(method, params, Some(self.inner.command_timeout))
            .await
    }

    /// Sends a command by method name.
    ///
    /// `None` or a zero duration waits without a deadline.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn send_raw_with_timeout(
        &self,
        method: &str,
        params: Value,
        command_timeout: Option<Duration>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let id = CommandId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let text = CommandFrame::new(id, method, &params).to_text()?;
        let (tx, rx) = oneshot::channel();

        // Register before writing so a fast response cannot be missed.
        self.inner.pending.lock().insert(
            id,
            PendingCommand {
                method: method.to_string(),
                issued_at: Instant::now(),
                tx,
            },
        );
        let _guard = PendingGuard {
            inner: self.inner.as_ref(),
            id,
        };

        // A close that drained the table before our insert would leave us hanging.
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        if let Some(tap) = &self.inner.tap {
            tap.frame(FrameDirection::Outgoing, &text);
        }
        trace!(%id, method, "Sending command");
        self.inner.transport.send(text).await?;

        let deadline = command_timeout.filter(|d| !d.is_zero());
        match deadline {
            Some(deadline) => match timeout(deadline, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::ConnectionClosed),
                Err(_) => {
                    let timeout_ms = deadline.as_millis() as u64;
                    warn!(%id, method, timeout_ms, "Command timed out");
                    Err(Error::command_timeout(id, method, timeout_ms))
                }
            },
            None => rx.await.map_err(|_| Error::ConnectionClosed)?,
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Registers a listener for an event method.
    pub fn on(
        &self,
        event: &str,
        listener: impl Fn(&ParsedEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId::generate();
        self.inner
            .listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };

        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Registers a listener called once when the connection closes.
    ///
    /// Runs immediately if the connection is already closed.
    pub fn on_close(&self, listener: impl FnOnce(&str) + Send + 'static) {
        {
            let mut listeners = self.inner.close_listeners.lock();
            if !self.is_closed() {
                listeners.push(Box::new(listener));
                return;
            }
        }

        let reason = self.close_reason().unwrap_or_default();
        listener(&reason);
    }

    /// Dispatches a locally synthesized event through the listener path.
    pub fn emit_local(&self, event: &ParsedEvent) {
        self.inner.dispatch(event);
    }

    /// Returns the number of listeners for an event method.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.lock().get(event).map_or(0, Vec::len)
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Returns the number of in-flight commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns `true` once the connection is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns why the connection closed.
    #[must_use]
    pub fn close_reason(&self) -> Option<String> {
        self.inner.close_reason.lock().clone()
    }

    /// Returns the default command timeout.
    #[inline]
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.inner.command_timeout
    }

    /// Closes the connection. Idempotent.
    ///
    /// Rejects every pending command with [`Error::ConnectionClosed`]
    /// before tearing down the transport.
    pub async fn close(&self) {
        self.inner.mark_closed("Connection closed");
        self.inner.transport.close().await;
    }
}

// ============================================================================
// ConnectionInner
// ============================================================================

impl ConnectionInner {
    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => self.handle_incoming_message(&text),
            TransportEvent::Closed { reason } => {
                self.mark_closed(&reason);
            }
        }
    }

    /// Handles an incoming text frame.
    fn handle_incoming_message(&self, text: &str) {
        if let Some(tap) = &self.tap {
            tap.frame(FrameDirection::Incoming, text);
        }

        let incoming = match Incoming::parse(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "Failed to parse incoming message");
                return;
            }
        };

        match incoming {
            Incoming::Success { id, result } => {
                let Some(pending) = self.pending.lock().remove(&id) else {
                    debug!(%id, "Response for unknown command");
                    return;
                };
                trace!(
                    %id,
                    method = %pending.method,
                    elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
                    "Command succeeded"
                );
                let _ = pending.tx.send(Ok(result));
            }

            Incoming::Error {
                id: Some(id),
                error,
                message,
            } => {
                let Some(pending) = self.pending.lock().remove(&id) else {
                    debug!(%id, %error, "Error for unknown command");
                    return;
                };
                debug!(%id, method = %pending.method, %error, %message, "Command failed");
                let err = Error::protocol_error(pending.method, error, message);
                let _ = pending.tx.send(Err(err));
            }

            Incoming::Error {
                id: None,
                error,
                message,
            } => {
                warn!(%error, %message, "Uncorrelated protocol error");
            }

            Incoming::Event { method, params } => {
                let event = Event::new(method, params).parse();
                self.dispatch(&event);
            }
        }
    }

    /// Invokes every listener for the event, in registration order.
    fn dispatch(&self, event: &ParsedEvent) {
        let snapshot: Vec<EventListener> = match self.listeners.lock().get(event.method()) {
            Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(method = event.method(), "Event listener panicked");
            }
        }
    }

    /// Marks the connection closed. Returns `false` if it already was.
    fn mark_closed(&self, reason: &str) -> bool {
        {
            let mut close_reason = self.close_reason.lock();
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            *close_reason = Some(reason.to_string());
            self.closed.store(true, Ordering::SeqCst);
        }
        debug!(%reason, "Connection closed");

        self.fail_pending_requests();

        let listeners = std::mem::take(&mut *self.close_listeners.lock());
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(reason))).is_err() {
                error!("Close listener panicked");
            }
        }
        true
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        let count = pending.len();

        for (_, command) in pending {
            let _ = command.tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending commands on close");
        }
    }
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Removes a correlation entry when the caller stops waiting for it.
struct PendingGuard<'a> {
    inner: &'a ConnectionInner,
    id: CommandId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.pending.lock().remove(&self.id).is_some() {
            trace!(id = %self.id, "Removed abandoned correlation");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use crate::protocol::SessionCommand;
    use crate::transport::channel_pair;

    fn connect() -> (Connection, crate::transport::ChannelRemote) {
        let (transport, remote) = channel_pair();
        let connection =
            Connection::new(Arc::new(transport), DEFAULT_COMMAND_TIMEOUT, None).expect("connect");
        (connection, remote)
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let (connection, mut remote) = connect();

        let c = connection.clone();
        let first = tokio::spawn(async move { c.send(SessionCommand::Status {}).await });
        let frame = remote.recv().await.expect("frame");
        assert_eq!(frame["id"], json!(1));
        assert_eq!(frame["method"], json!("session.status"));
        remote.respond(CommandId::new(1), json!({"ready": true, "message": ""}));
        assert_eq!(first.await.expect("join").expect("ok")["ready"], json!(true));

        let c = connection.clone();
        let second = tokio::spawn(async move { c.send_raw("session.status", json!({})).await });
        let frame = remote.recv().await.expect("frame");
        assert_eq!(frame["id"], json!(2));
        remote.respond(CommandId::new(2), json!({}));
        second.await.expect("join").expect("ok");

        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (connection, mut remote) = connect();

        let a = tokio::spawn({
            let c = connection.clone();
            async move { c.send_raw("x.a", json!({})).await }
        });
        let b = tokio::spawn({
            let c = connection.clone();
            async move { c.send_raw("x.b", json!({})).await }
        });

        let first = remote.recv().await.expect("frame");
        let second = remote.recv().await.expect("frame");
        for frame in [&second, &first] {
            let id = CommandId::new(frame["id"].as_u64().expect("id"));
            remote.respond(id, json!({"method": frame["method"]}));
        }

        assert_eq!(a.await.expect("join").expect("ok")["method"], json!("x.a"));
        assert_eq!(b.await.expect("join").expect("ok")["method"], json!("x.b"));
    }

    #[tokio::test]
    async fn test_error_envelope_carries_method() {
        let (connection, mut remote) = connect();

        let task = tokio::spawn({
            let c = connection.clone();
            async move { c.send_raw("browsingContext.navigate", json!({})).await }
        });
        let frame = remote.recv().await.expect("frame");
        let id = CommandId::new(frame["id"].as_u64().expect("id"));
        remote.respond_error(id, "unknown error", "net::ERR_NAME_NOT_RESOLVED");

        let err = task.await.expect("join").unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol { ref method, ref error, ref message }
                if method == "browsingContext.navigate"
                    && error == "unknown error"
                    && message == "net::ERR_NAME_NOT_RESOLVED"
        ));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_pending() {
        let (connection, mut remote) = connect();

        let task = tokio::spawn({
            let c = connection.clone();
            async move { c.send_raw("session.status", json!({})).await }
        });
        remote.recv().await.expect("frame");

        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        connection.on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        connection.close().await;
        connection.close().await;

        assert!(matches!(task.await.expect("join"), Err(Error::ConnectionClosed)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            connection.send_raw("session.status", json!({})).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_listener_panic_does_not_stop_delivery() {
        let (connection, remote) = connect();
        let seen = Arc::new(AtomicUsize::new(0));

        connection.on("log.entryAdded", |_| panic!("listener failure"));
        let counter = Arc::clone(&seen);
        connection.on("log.entryAdded", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        remote.emit("log.entryAdded", json!({}));
        remote.emit("log.entryAdded", json!({}));

        // Round trip to flush the delivery task.
        let mut remote = remote;
        let task = tokio::spawn({
            let c = connection.clone();
            async move { c.send_raw("session.status", json!({})).await }
        });
        let frame = remote.recv().await.expect("frame");
        remote.respond(CommandId::new(frame["id"].as_u64().expect("id")), json!({}));
        task.await.expect("join").expect("ok");

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_off_removes_listener() {
        let (connection, _remote) = connect();
        let id = connection.on("browsingContext.load", |_| {});
        assert_eq!(connection.listener_count("browsingContext.load"), 1);
        assert!(connection.off("browsingContext.load", id));
        assert!(!connection.off("browsingContext.load", id));
        assert_eq!(connection.listener_count("browsingContext.load"), 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_releases_entry() {
        let (connection, mut remote) = connect();

        let task = tokio::spawn({
            let c = connection.clone();
            async move { c.send_raw("session.status", json!({})).await }
        });
        remote.recv().await.expect("frame");
        assert_eq!(connection.pending_count(), 1);

        task.abort();
        let _ = task.await;
        assert_eq!(connection.pending_count(), 0);
    }
}
