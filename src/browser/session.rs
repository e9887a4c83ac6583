//! Negotiated protocol session.
//!
//! A [`Session`] is established once per connection with `session.new` and
//! owns the [`Browser`] root. Closing the connection or ending the session
//! disposes the whole tree.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::{BrowsingContextId, ListenerId, SessionId, SubscriptionId};
use crate::protocol::SessionCommand;
use crate::transport::Connection;

use super::core::{Browser, WeakBrowser};
use super::lifecycle::Lifecycle;

// ============================================================================
// Types
// ============================================================================

/// Session lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session ended. Terminal.
    Ended {
        /// Why it ended.
        reason: String,
    },
}

/// Result of `session.status`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionStatus {
    /// Whether the remote end accepts new sessions.
    pub ready: bool,
    /// Implementation-defined status text.
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Session
// ============================================================================

/// A negotiated BiDi session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    connection: Connection,
    capabilities: Value,
    lifecycle: Lifecycle<SessionEvent>,
    browser: Mutex<Option<WeakBrowser>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("ended", &self.is_ended())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Negotiates a session with `session.new`.
    ///
    /// `capabilities` is sent as the `alwaysMatch` member.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the remote end refused the session
    /// - [`Error::MalformedMessage`] if the response has no `sessionId`
    pub async fn from(connection: Connection, capabilities: Value) -> Result<Self> {
        let result = connection
            .send(SessionCommand::New {
                capabilities: json!({ "alwaysMatch": capabilities }),
            })
            .await?;

        let id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(SessionId::new)
            .ok_or_else(|| Error::malformed("session.new response without sessionId"))?;
        let capabilities = result.get("capabilities").cloned().unwrap_or(Value::Null);

        let session = Self {
            inner: Arc::new(SessionInner {
                id,
                connection: connection.clone(),
                capabilities,
                lifecycle: Lifecycle::new(),
                browser: Mutex::new(None),
            }),
        };

        let weak = Arc::downgrade(&session.inner);
        connection.on_close(move |reason| {
            if let Some(inner) = Weak::upgrade(&weak) {
                Session { inner }.dispose(reason);
            }
        });

        info!(session = %session.id(), "Session established");
        Ok(session)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Returns the capabilities the remote end accepted.
    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &Value {
        &self.inner.capabilities
    }

    /// Returns the connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the browser, if one is attached and alive.
    #[must_use]
    pub fn browser(&self) -> Option<Browser> {
        self.inner.browser.lock().as_ref().and_then(WeakBrowser::upgrade)
    }

    /// Returns `true` once the session has ended.
    #[inline]
    #[must_use]
    pub fn is_ended(&self) -> bool {
        !self.inner.lifecycle.is_open()
    }

    /// Returns why the session ended.
    #[must_use]
    pub fn ended_reason(&self) -> Option<String> {
        self.inner.lifecycle.reason()
    }

    /// Registers a lifecycle listener.
    pub fn on(&self, listener: impl Fn(&SessionEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.lifecycle.on(listener)
    }

    /// Removes a lifecycle listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.lifecycle.off(id)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Queries remote end readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn status(&self) -> Result<SessionStatus> {
        let result = self.inner.connection.send(SessionCommand::Status {}).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribes to events or whole modules.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionEnded`] if the session has ended
    /// - [`Error::Protocol`] if the remote end rejected the subscription
    pub async fn subscribe(
        &self,
        events: &[impl AsRef<str>],
        contexts: Option<&[BrowsingContextId]>,
    ) -> Result<Option<SubscriptionId>> {
        self.ensure_open()?;

        let events: Vec<String> = events.iter().map(|e| e.as_ref().to_string()).collect();
        debug!(?events, "Subscribing");
        let result = self
            .inner
            .connection
            .send(SessionCommand::Subscribe {
                events,
                contexts: contexts.map(<[_]>::to_vec),
            })
            .await?;

        Ok(result
            .get("subscription")
            .and_then(Value::as_str)
            .map(SubscriptionId::new))
    }

    /// Unsubscribes from events or whole modules.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionEnded`] if the session has ended
    /// - [`Error::Protocol`] if the remote end rejected the request
    pub async fn unsubscribe(
        &self,
        events: &[impl AsRef<str>],
        contexts: Option<&[BrowsingContextId]>,
    ) -> Result<()> {
        self.ensure_open()?;

        let events = events.iter().map(|e| e.as_ref().to_string()).collect();
        self.inner
            .connection
            .send(SessionCommand::Unsubscribe {
                events,
                contexts: contexts.map(<[_]>::to_vec),
            })
            .await?;
        Ok(())
    }

    /// Ends the session and disposes the tree.
    ///
    /// The tree is disposed even if `session.end` fails.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionEnded`] if the session already ended
    /// - Any error returned by `session.end`
    pub async fn end(&self) -> Result<()> {
        self.ensure_open()?;

        let result = self.inner.connection.send(SessionCommand::End {}).await;
        self.dispose("Session already ended");
        result.map(|_| ())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    pub(crate) fn attach_browser(&self, browser: &Browser) {
        *self.inner.browser.lock() = Some(browser.downgrade());
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.inner.lifecycle.is_open() {
            return Ok(());
        }
        Err(Error::session_ended(
            self.inner.lifecycle.reason().unwrap_or_default(),
        ))
    }

    /// Disposes the browser, then emits [`SessionEvent::Ended`].
    pub(crate) fn dispose(&self, reason: &str) {
        let Some(guard) = self.inner.lifecycle.begin_close(reason) else {
            return;
        };
        debug!(session = %self.inner.id, %reason, "Disposing session");

        let browser = self.inner.browser.lock().take();
        if let Some(browser) = browser.as_ref().and_then(WeakBrowser::upgrade) {
            browser.dispose(reason);
        }

        guard.finish(SessionEvent::Ended {
            reason: reason.to_string(),
        });
    }
}
