//! Browser root node.
//!
//! The [`Browser`] owns an identity map of user contexts, created lazily the
//! first time an id is seen and removed exactly once when the user context
//! closes. Top-level `contextCreated` events are routed from here into the
//! owning user context.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::driver::BidiOptions;
use crate::error::{Error, Result};
use crate::identifiers::{ListenerId, PreloadScriptId, UserContextId};
use crate::protocol::{
    BrowserCommand, BrowsingContextCommand, ContextInfo, ParsedEvent, ScriptCommand, names,
};
use crate::transport::Connection;

use super::context::BrowsingContext;
use super::lifecycle::{Lifecycle, ListenerScope};
use super::session::Session;
use super::user_context::{UserContext, UserContextEvent};

// ============================================================================
// Types
// ============================================================================

/// Browser lifecycle events.
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    /// A user context appeared in the identity map.
    UserContextCreated(UserContext),
    /// The browser closed. Terminal.
    Closed {
        /// Why it closed.
        reason: String,
    },
}

#[derive(Deserialize)]
struct UserContextInfo {
    #[serde(rename = "userContext")]
    user_context: UserContextId,
}

#[derive(Deserialize)]
struct UserContextList {
    #[serde(rename = "userContexts")]
    user_contexts: Vec<UserContextInfo>,
}

#[derive(Deserialize)]
struct ContextTree {
    contexts: Vec<ContextInfo>,
}

// ============================================================================
// Browser
// ============================================================================

/// Root of the object tree.
#[derive(Clone)]
pub struct Browser {
    inner: Arc<BrowserInner>,
}

pub(crate) struct BrowserInner {
    session: Session,
    connection: Connection,
    options: Arc<BidiOptions>,
    lifecycle: Lifecycle<BrowserEvent>,
    user_contexts: Mutex<FxHashMap<UserContextId, UserContext>>,
    scope: ListenerScope,
}

/// Non-owning reference held by the session.
#[derive(Clone)]
pub(crate) struct WeakBrowser(Weak<BrowserInner>);

impl WeakBrowser {
    pub(crate) fn upgrade(&self) -> Option<Browser> {
        self.0.upgrade().map(|inner| Browser { inner })
    }
}

impl fmt::Debug for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Browser")
            .field("session", self.inner.session.id())
            .field("user_contexts", &self.inner.user_contexts.lock().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Browser {
    /// Builds the tree for a session.
    ///
    /// Subscribes to the configured modules, then seeds user contexts from
    /// `browser.getUserContexts` and browsing contexts from
    /// `browsingContext.getTree`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the seeding commands fail.
    pub async fn from(session: &Session, options: Arc<BidiOptions>) -> Result<Self> {
        session
            .subscribe(options.subscribe_modules.as_slice(), None)
            .await?;

        let connection = session.connection().clone();
        let browser = Self {
            inner: Arc::new(BrowserInner {
                session: session.clone(),
                connection: connection.clone(),
                options,
                lifecycle: Lifecycle::new(),
                user_contexts: Mutex::new(FxHashMap::default()),
                scope: ListenerScope::new(connection),
            }),
        };

        browser.register_listeners();
        session.attach_browser(&browser);

        browser.sync_user_contexts().await?;
        browser.sync_tree().await?;

        info!(
            name = %browser.browser_name(),
            version = %browser.browser_version(),
            "Browser ready"
        );
        Ok(browser)
    }

    fn register_listeners(&self) {
        let weak = self.downgrade();
        self.inner.scope.on(names::CONTEXT_CREATED, move |event| {
            if let ParsedEvent::ContextCreated(info) = event
                && info.parent.is_none()
                && let Some(browser) = weak.upgrade()
            {
                browser.adopt_top_level(info);
            }
        });
    }

    async fn sync_user_contexts(&self) -> Result<()> {
        let result = self
            .inner
            .connection
            .send(BrowserCommand::GetUserContexts {})
            .await?;
        let list: UserContextList = serde_json::from_value(result)?;

        for info in list.user_contexts {
            self.get_or_create_user_context(info.user_context);
        }
        Ok(())
    }

    async fn sync_tree(&self) -> Result<()> {
        let result = self
            .inner
            .connection
            .send(BrowsingContextCommand::GetTree {
                max_depth: None,
                root: None,
            })
            .await?;
        let tree: ContextTree = serde_json::from_value(result)?;

        for info in tree.contexts {
            self.replay_created(info, None);
        }
        Ok(())
    }

    /// Replays a `getTree` entry and its descendants as `contextCreated`.
    fn replay_created(&self, mut info: ContextInfo, parent: Option<&ContextInfo>) {
        let children = info.children.take().unwrap_or_default();
        if let Some(parent) = parent {
            info.parent = Some(parent.context.clone());
            info.user_context = parent.user_context.clone();
        }

        let event = ParsedEvent::ContextCreated(info);
        self.inner.connection.emit_local(&event);

        let ParsedEvent::ContextCreated(info) = event else {
            return;
        };
        for child in children {
            self.replay_created(child, Some(&info));
        }
    }

    fn adopt_top_level(&self, info: &ContextInfo) {
        if !self.inner.lifecycle.is_open() {
            return;
        }
        if let Some(user_context) = self.get_or_create_user_context(info.user_context.clone()) {
            user_context.adopt(info);
        }
    }

    /// Returns the user context wrapper for `id`, creating it on first sight.
    fn get_or_create_user_context(&self, id: UserContextId) -> Option<UserContext> {
        if !self.inner.lifecycle.is_open() {
            return None;
        }

        let created = {
            let mut map = self.inner.user_contexts.lock();
            if let Some(existing) = map.get(&id) {
                return Some(existing.clone());
            }
            let user_context = UserContext::new(
                id.clone(),
                self.inner.connection.clone(),
                Arc::clone(&self.inner.options),
            );
            map.insert(id.clone(), user_context.clone());
            user_context
        };

        let weak = self.downgrade();
        let closed_id = id.clone();
        created.on(move |event| {
            if let UserContextEvent::Closed { .. } = event
                && let Some(browser) = weak.upgrade()
            {
                browser.inner.user_contexts.lock().remove(&closed_id);
            }
        });

        debug!(user_context = %id, "User context created");
        self.inner
            .lifecycle
            .emit(&BrowserEvent::UserContextCreated(created.clone()));
        Some(created)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Returns the connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the options the tree was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BidiOptions {
        &self.inner.options
    }

    /// Returns the browser name reported in the session capabilities.
    #[must_use]
    pub fn browser_name(&self) -> String {
        self.capability_str("browserName")
    }

    /// Returns the browser version reported in the session capabilities.
    #[must_use]
    pub fn browser_version(&self) -> String {
        self.capability_str("browserVersion")
    }

    fn capability_str(&self, key: &str) -> String {
        self.inner
            .session
            .capabilities()
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Returns all live user contexts, ordered by id.
    #[must_use]
    pub fn user_contexts(&self) -> Vec<UserContext> {
        let mut contexts: Vec<UserContext> =
            self.inner.user_contexts.lock().values().cloned().collect();
        contexts.sort_by(|a, b| a.id().cmp(b.id()));
        contexts
    }

    /// Returns a user context by id.
    #[must_use]
    pub fn user_context(&self, id: &UserContextId) -> Option<UserContext> {
        self.inner.user_contexts.lock().get(id).cloned()
    }

    /// Returns the default user context.
    #[must_use]
    pub fn default_user_context(&self) -> Option<UserContext> {
        self.user_context(&UserContextId::default_context())
    }

    /// Returns every top-level browsing context across user contexts.
    #[must_use]
    pub fn browsing_contexts(&self) -> Vec<BrowsingContext> {
        self.user_contexts()
            .iter()
            .flat_map(UserContext::browsing_contexts)
            .collect()
    }

    /// Returns `true` once the browser has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.inner.lifecycle.is_open()
    }

    /// Returns why the browser closed.
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.inner.lifecycle.reason()
    }

    /// Registers a lifecycle listener.
    pub fn on(&self, listener: impl Fn(&BrowserEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.lifecycle.on(listener)
    }

    /// Removes a lifecycle listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.lifecycle.off(id)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Creates a user context.
    ///
    /// # Errors
    ///
    /// - [`Error::BrowserClosed`] if the browser is closed
    /// - [`Error::Protocol`] if the remote end refused
    pub async fn create_user_context(&self) -> Result<UserContext> {
        self.ensure_open()?;

        let accept_insecure_certs = self.inner.options.accept_insecure_certs.then_some(true);
        let result = self
            .inner
            .connection
            .send(BrowserCommand::CreateUserContext {
                accept_insecure_certs,
            })
            .await?;
        let info: UserContextInfo = serde_json::from_value(result)?;

        self.get_or_create_user_context(info.user_context)
            .ok_or_else(|| self.closed_error())
    }

    /// Registers a preload script for every context.
    ///
    /// # Errors
    ///
    /// - [`Error::BrowserClosed`] if the browser is closed
    /// - [`Error::Protocol`] if the remote end refused
    pub async fn add_preload_script(
        &self,
        function_declaration: &str,
        sandbox: Option<&str>,
    ) -> Result<PreloadScriptId> {
        self.ensure_open()?;

        let result = self
            .inner
            .connection
            .send(ScriptCommand::AddPreloadScript {
                function_declaration: function_declaration.to_string(),
                contexts: None,
                user_contexts: None,
                sandbox: sandbox.map(str::to_string),
            })
            .await?;
        preload_script_id(&result)
    }

    /// Removes a preload script.
    ///
    /// # Errors
    ///
    /// - [`Error::BrowserClosed`] if the browser is closed
    /// - [`Error::Protocol`] if the script is unknown
    pub async fn remove_preload_script(&self, script: &PreloadScriptId) -> Result<()> {
        self.ensure_open()?;

        self.inner
            .connection
            .send(ScriptCommand::RemovePreloadScript {
                script: script.clone(),
            })
            .await?;
        Ok(())
    }

    /// Closes the browser with `browser.close` and disposes the tree.
    ///
    /// The tree is disposed even when the command fails.
    ///
    /// # Errors
    ///
    /// - [`Error::BrowserClosed`] if the browser is already closed
    /// - [`Error::Protocol`] if the remote end refused
    pub async fn close(&self) -> Result<()> {
        self.ensure_open()?;

        let result = self
            .inner
            .connection
            .send(BrowserCommand::Close {})
            .await;
        self.dispose("Browser already closed");
        result.map(drop)
    }

    /// Ends the session and closes the connection, leaving the browser
    /// process running.
    pub async fn disconnect(&self) {
        if !self.inner.session.is_ended()
            && let Err(e) = self.inner.session.end().await
        {
            debug!(error = %e, "session.end failed during disconnect");
        }
        self.inner.connection.close().await;
    }

    // ========================================================================
    // Internal
    // ========================================================================

    pub(crate) fn downgrade(&self) -> WeakBrowser {
        WeakBrowser(Arc::downgrade(&self.inner))
    }

    fn closed_error(&self) -> Error {
        Error::browser_closed(self.inner.lifecycle.reason().unwrap_or_default())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.lifecycle.is_open() {
            Ok(())
        } else {
            Err(self.closed_error())
        }
    }

    /// Disposes every user context, then emits [`BrowserEvent::Closed`].
    pub(crate) fn dispose(&self, reason: &str) {
        let Some(guard) = self.inner.lifecycle.begin_close(reason) else {
            return;
        };
        debug!(%reason, "Disposing browser");

        let user_contexts: Vec<UserContext> = self
            .inner
            .user_contexts
            .lock()
            .drain()
            .map(|(_, user_context)| user_context)
            .collect();
        for user_context in user_contexts {
            user_context.dispose(reason);
        }

        self.inner.scope.release();
        guard.finish(BrowserEvent::Closed {
            reason: reason.to_string(),
        });
    }
}

/// Extracts `script` from an `addPreloadScript` result.
pub(crate) fn preload_script_id(result: &Value) -> Result<PreloadScriptId> {
    result
        .get("script")
        .and_then(Value::as_str)
        .map(PreloadScriptId::new)
        .ok_or_else(|| Error::malformed("addPreloadScript response without script"))
}
