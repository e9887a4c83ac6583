//! User contexts (isolated storage partitions).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::driver::BidiOptions;
use crate::error::{Error, Result};
use crate::identifiers::{BrowsingContextId, ListenerId, UserContextId};
use crate::protocol::{BrowserCommand, BrowsingContextCommand, ContextInfo, CreateType};
use crate::transport::Connection;

use super::context::{BrowsingContext, BrowsingContextEvent};
use super::lifecycle::Lifecycle;

// ============================================================================
// Types
// ============================================================================

/// User context lifecycle events.
#[derive(Debug, Clone)]
pub enum UserContextEvent {
    /// A top-level browsing context was created in this user context.
    BrowsingContext(BrowsingContext),
    /// The user context closed. Terminal.
    Closed {
        /// Why it closed.
        reason: String,
    },
}

/// Options for [`UserContext::create_browsing_context`].
#[derive(Debug, Clone, Default)]
pub struct CreateContextOptions {
    /// Open next to this context.
    pub reference_context: Option<BrowsingContextId>,
    /// Open without activating.
    pub background: bool,
}

impl CreateContextOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens next to `context`.
    #[must_use]
    pub fn with_reference_context(mut self, context: BrowsingContextId) -> Self {
        self.reference_context = Some(context);
        self
    }

    /// Opens in the background.
    #[must_use]
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }
}

// ============================================================================
// UserContext
// ============================================================================

/// A storage partition holding top-level browsing contexts.
#[derive(Clone)]
pub struct UserContext {
    inner: Arc<UserContextInner>,
}

struct UserContextInner {
    id: UserContextId,
    connection: Connection,
    options: Arc<BidiOptions>,
    lifecycle: Lifecycle<UserContextEvent>,
    contexts: Mutex<Vec<BrowsingContext>>,
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserContext")
            .field("id", &self.inner.id)
            .field("contexts", &self.inner.contexts.lock().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl UserContext {
    pub(crate) fn new(id: UserContextId, connection: Connection, options: Arc<BidiOptions>) -> Self {
        Self {
            inner: Arc::new(UserContextInner {
                id,
                connection,
                options,
                lifecycle: Lifecycle::new(),
                contexts: Mutex::new(Vec::new()),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the user context id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &UserContextId {
        &self.inner.id
    }

    /// Returns `true` for the `default` user context.
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.inner.id.is_default()
    }

    /// Returns the live top-level browsing contexts, in creation order.
    #[must_use]
    pub fn browsing_contexts(&self) -> Vec<BrowsingContext> {
        self.inner.contexts.lock().clone()
    }

    /// Returns a top-level browsing context by id.
    #[must_use]
    pub fn browsing_context(&self, id: &BrowsingContextId) -> Option<BrowsingContext> {
        self.inner
            .contexts
            .lock()
            .iter()
            .find(|context| context.id() == id)
            .cloned()
    }

    /// Returns `true` once the user context has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.inner.lifecycle.is_open()
    }

    /// Returns why the user context closed.
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.inner.lifecycle.reason()
    }

    /// Registers a lifecycle listener.
    pub fn on(&self, listener: impl Fn(&UserContextEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.lifecycle.on(listener)
    }

    /// Removes a lifecycle listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.lifecycle.off(id)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Opens a tab or window in this user context.
    ///
    /// The returned context is the same instance the tree tracks, whether the
    /// `contextCreated` event arrived before or after the response.
    ///
    /// # Errors
    ///
    /// - [`Error::UserContextClosed`] if the user context is closed
    /// - [`Error::Protocol`] if the remote end refused
    pub async fn create_browsing_context(
        &self,
        kind: CreateType,
        options: CreateContextOptions,
    ) -> Result<BrowsingContext> {
        self.ensure_open()?;

        let result = self
            .inner
            .connection
            .send(BrowsingContextCommand::Create {
                kind,
                reference_context: options.reference_context,
                background: options.background.then_some(true),
                user_context: Some(self.inner.id.clone()),
            })
            .await?;

        let id = result
            .get("context")
            .and_then(Value::as_str)
            .map(BrowsingContextId::new)
            .ok_or_else(|| Error::malformed("browsingContext.create response without context"))?;

        if let Some(existing) = self.browsing_context(&id) {
            return Ok(existing);
        }

        let info = ContextInfo::top_level(id.clone(), self.inner.id.clone(), "about:blank");
        self.adopt(&info)
            .ok_or_else(|| Error::context_closed(id, self.closed_reason().unwrap_or_default()))
    }

    /// Removes the user context with `browser.removeUserContext`, closing all
    /// of its browsing contexts.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for the default user context
    /// - [`Error::UserContextClosed`] if already closed
    /// - [`Error::Protocol`] if the remote end refused
    pub async fn remove(&self) -> Result<()> {
        if self.is_default() {
            return Err(Error::invalid_argument(
                "The default user context cannot be removed",
            ));
        }
        self.ensure_open()?;

        self.inner
            .connection
            .send(BrowserCommand::RemoveUserContext {
                user_context: self.inner.id.clone(),
            })
            .await?;
        self.dispose("User context already closed");
        Ok(())
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.inner.lifecycle.is_open() {
            return Ok(());
        }
        Err(Error::user_context_closed(
            self.inner.id.clone(),
            self.inner.lifecycle.reason().unwrap_or_default(),
        ))
    }

    /// Starts tracking a top-level context. Duplicates are ignored.
    pub(crate) fn adopt(&self, info: &ContextInfo) -> Option<BrowsingContext> {
        if !self.inner.lifecycle.is_open() {
            return None;
        }

        let context = {
            let mut contexts = self.inner.contexts.lock();
            if let Some(existing) = contexts.iter().find(|c| c.id() == &info.context) {
                return Some(existing.clone());
            }
            let context = BrowsingContext::new(
                info,
                self.inner.connection.clone(),
                Arc::clone(&self.inner.options),
            );
            contexts.push(context.clone());
            context
        };

        let weak: Weak<UserContextInner> = Arc::downgrade(&self.inner);
        let closed_id = context.id().clone();
        context.on(move |event| {
            if let BrowsingContextEvent::Closed { .. } = event
                && let Some(inner) = weak.upgrade()
            {
                inner.contexts.lock().retain(|c| c.id() != &closed_id);
            }
        });

        debug!(user_context = %self.inner.id, context = %context.id(), "Browsing context adopted");
        self.inner
            .lifecycle
            .emit(&UserContextEvent::BrowsingContext(context.clone()));
        Some(context)
    }

    /// Disposes every browsing context, then emits [`UserContextEvent::Closed`].
    pub(crate) fn dispose(&self, reason: &str) {
        let Some(guard) = self.inner.lifecycle.begin_close(reason) else {
            return;
        };
        debug!(user_context = %self.inner.id, %reason, "Disposing user context");

        let contexts = std::mem::take(&mut *self.inner.contexts.lock());
        for context in contexts {
            context.dispose(reason);
        }

        guard.finish(UserContextEvent::Closed {
            reason: reason.to_string(),
        });
    }
}
