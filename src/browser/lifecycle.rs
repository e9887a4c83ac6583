//! Shared lifecycle machinery for tree nodes.
//!
//! Every node in the object tree (session, browser, user context, browsing
//! context, realm) owns a [`Lifecycle`]. Disposal is split in two phases:
//!
//! 1. [`Lifecycle::begin_close`] records the reason and moves the node to
//!    `Closing`, returning a [`CloseGuard`].
//! 2. [`CloseGuard::finish`] emits the terminal event and only then moves
//!    the node to `Disposed` and drops its listeners.
//!
//! Emission is suppressed once a node is `Disposed`, so the terminal event
//! can only be delivered through the guard.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::identifiers::ListenerId;
use crate::protocol::ParsedEvent;
use crate::transport::Connection;

// ============================================================================
// EventEmitter
// ============================================================================

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered, panic-isolated listener list.
pub struct EventEmitter<E> {
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> EventEmitter<E> {
    /// Creates an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn on(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId::generate();
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Invokes every listener in registration order.
    ///
    /// Listeners added or removed during emission take effect next time.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("Lifecycle listener panicked");
            }
        }
    }

    /// Drops every listener.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Returns the number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns `true` if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle phase of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Live.
    Open,
    /// Disposal started; the terminal event has not been emitted yet.
    Closing,
    /// Terminal event emitted; the node is inert.
    Disposed,
}

struct LifecycleData {
    state: LifecycleState,
    reason: Option<String>,
}

/// Lifecycle state plus event emitter of one node.
pub struct Lifecycle<E> {
    data: Mutex<LifecycleData>,
    emitter: EventEmitter<E>,
}

impl<E> Default for Lifecycle<E> {
    fn default() -> Self {
        Self {
            data: Mutex::new(LifecycleData {
                state: LifecycleState::Open,
                reason: None,
            }),
            emitter: EventEmitter::new(),
        }
    }
}

impl<E> fmt::Debug for Lifecycle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Lifecycle")
            .field("state", &data.state)
            .field("reason", &data.reason)
            .finish_non_exhaustive()
    }
}

impl<E> Lifecycle<E> {
    /// Creates an open lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn on(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        self.emitter.on(listener)
    }

    /// Removes a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.emitter.off(id)
    }

    /// Emits a non-terminal event. Inert once disposed.
    pub fn emit(&self, event: &E) {
        if self.state() == LifecycleState::Disposed {
            return;
        }
        self.emitter.emit(event);
    }

    /// Returns the current phase.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.data.lock().state
    }

    /// Returns `true` once the terminal event has been emitted.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state() == LifecycleState::Disposed
    }

    /// Returns `true` unless disposal has started.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == LifecycleState::Open
    }

    /// Returns the disposal reason, if disposal has started.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.data.lock().reason.clone()
    }

    /// Returns the number of listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.emitter.len()
    }

    /// Starts disposal.
    ///
    /// Returns `None` if disposal already started, which makes disposal
    /// idempotent.
    pub fn begin_close(&self, reason: impl Into<String>) -> Option<CloseGuard<'_, E>> {
        let mut data = self.data.lock();
        if data.state != LifecycleState::Open {
            return None;
        }
        data.state = LifecycleState::Closing;
        data.reason = Some(reason.into());
        Some(CloseGuard {
            lifecycle: self,
            finished: false,
        })
    }

    fn commit(&self) {
        self.data.lock().state = LifecycleState::Disposed;
        self.emitter.clear();
    }
}

// ============================================================================
// CloseGuard
// ============================================================================

/// Second phase of disposal.
///
/// The node stays `Closing` until [`CloseGuard::finish`] has emitted the
/// terminal event.
#[must_use = "disposal completes only through CloseGuard::finish"]
pub struct CloseGuard<'a, E> {
    lifecycle: &'a Lifecycle<E>,
    finished: bool,
}

impl<E> CloseGuard<'_, E> {
    /// Returns the disposal reason.
    #[must_use]
    pub fn reason(&self) -> String {
        self.lifecycle.reason().unwrap_or_default()
    }

    /// Emits the terminal event, then marks the node disposed.
    pub fn finish(mut self, terminal: E) {
        self.lifecycle.emitter.emit(&terminal);
        self.lifecycle.commit();
        self.finished = true;
    }
}

impl<E> Drop for CloseGuard<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Close guard dropped without a terminal event");
            self.lifecycle.commit();
        }
    }
}

// ============================================================================
// ListenerScope
// ============================================================================

/// Connection listeners owned by one node, released together.
pub(crate) struct ListenerScope {
    connection: Connection,
    registrations: Mutex<Vec<(&'static str, ListenerId)>>,
}

impl ListenerScope {
    pub(crate) fn new(connection: Connection) -> Self {
        Self {
            connection,
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Registers a connection listener tied to this scope.
    pub(crate) fn on(
        &self,
        event: &'static str,
        listener: impl Fn(&ParsedEvent) + Send + Sync + 'static,
    ) {
        let id = self.connection.on(event, listener);
        self.registrations.lock().push((event, id));
    }

    /// Removes every registration.
    pub(crate) fn release(&self) {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        for (event, id) in registrations {
            self.connection.off(event, id);
        }
    }
}

impl Drop for ListenerScope {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestEvent {
        Ping,
        Closed(String),
    }

    #[test]
    fn test_terminal_event_fires_before_disposed() {
        let lifecycle = Arc::new(Lifecycle::<TestEvent>::new());
        let observed_disposed = Arc::new(AtomicBool::new(true));

        let weak = Arc::downgrade(&lifecycle);
        let flag = Arc::clone(&observed_disposed);
        lifecycle.on(move |event| {
            if let TestEvent::Closed(_) = event
                && let Some(lifecycle) = weak.upgrade()
            {
                flag.store(lifecycle.is_disposed(), Ordering::SeqCst);
            }
        });

        let guard = lifecycle.begin_close("gone").expect("open");
        assert_eq!(lifecycle.state(), LifecycleState::Closing);
        guard.finish(TestEvent::Closed("gone".to_string()));

        assert!(!observed_disposed.load(Ordering::SeqCst));
        assert!(lifecycle.is_disposed());
        assert_eq!(lifecycle.listener_count(), 0);
    }

    #[test]
    fn test_begin_close_is_idempotent() {
        let lifecycle = Lifecycle::<TestEvent>::new();
        let guard = lifecycle.begin_close("first").expect("open");
        assert!(lifecycle.begin_close("second").is_none());
        guard.finish(TestEvent::Closed("first".to_string()));

        assert!(lifecycle.begin_close("third").is_none());
        assert_eq!(lifecycle.reason().as_deref(), Some("first"));
    }

    #[test]
    fn test_emit_is_inert_after_dispose() {
        let lifecycle = Lifecycle::<TestEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        lifecycle.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        lifecycle.emit(&TestEvent::Ping);
        lifecycle
            .begin_close("done")
            .expect("open")
            .finish(TestEvent::Closed("done".to_string()));
        lifecycle.emit(&TestEvent::Ping);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emitter_isolates_panics() {
        let emitter = EventEmitter::<TestEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));

        emitter.on(|_| panic!("boom"));
        let counter = Arc::clone(&count);
        emitter.on(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(&TestEvent::Ping);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_guard_still_disposes() {
        let lifecycle = Lifecycle::<TestEvent>::new();
        drop(lifecycle.begin_close("abandoned"));
        assert!(lifecycle.is_disposed());
    }
}
