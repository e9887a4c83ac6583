//! Browsing contexts (tabs, windows and frames).
//!
//! A [`BrowsingContext`] keeps its URL, children, in-flight navigations and
//! realms in sync with `browsingContext.*`, `script.*` and `log.*` events.
//!
//! # Example
//!
//! ```ignore
//! let context = user_context
//!     .create_browsing_context(CreateType::Tab, CreateContextOptions::new())
//!     .await?;
//!
//! let result = context.navigate_and_wait("https://example.com", WaitUntil::Load).await?;
//! let title = context.evaluate("document.title").await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Context commands.
mod commands;

/// Navigation tracking.
mod navigation;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::driver::BidiOptions;
use crate::identifiers::{BrowsingContextId, ListenerId, NavigationId, UserContextId};
use crate::protocol::{
    ContextInfo, LogEntry, NavigationInfo, ParsedEvent, UserPromptClosedInfo,
    UserPromptOpenedInfo, names,
};
use crate::transport::Connection;

use super::lifecycle::{Lifecycle, ListenerScope};
use super::realm::Realm;

// ============================================================================
// Re-exports
// ============================================================================

pub use navigation::{
    NavigateResult, Navigation, NavigationOutcome, NavigationResult, NavigationWatcher, WaitUntil,
};

// ============================================================================
// Constants
// ============================================================================

/// Events a browsing context listens to.
const CONTEXT_EVENTS: [&str; 12] = [
    names::CONTEXT_CREATED,
    names::CONTEXT_DESTROYED,
    names::NAVIGATION_STARTED,
    names::FRAGMENT_NAVIGATED,
    names::HISTORY_UPDATED,
    names::DOM_CONTENT_LOADED,
    names::LOAD,
    names::NAVIGATION_FAILED,
    names::NAVIGATION_ABORTED,
    names::USER_PROMPT_OPENED,
    names::USER_PROMPT_CLOSED,
    names::LOG_ENTRY_ADDED,
];

const CLOSED_REASON: &str = "Browsing context already closed";
const PARENT_DISPOSED_REASON: &str = "Parent browsing context was disposed";

// ============================================================================
// Types
// ============================================================================

/// Browsing context events.
#[derive(Debug, Clone)]
pub enum BrowsingContextEvent {
    /// A navigation started.
    Navigation(Navigation),
    /// The URL changed through the History API.
    HistoryUpdated {
        /// New URL.
        url: String,
    },
    /// A fragment navigation completed.
    FragmentNavigated(NavigationInfo),
    /// `DOMContentLoaded` fired.
    DomContentLoaded(NavigationInfo),
    /// `load` fired.
    Load(NavigationInfo),
    /// A navigation failed.
    NavigationFailed(NavigationInfo),
    /// A navigation was aborted.
    NavigationAborted(NavigationInfo),
    /// A child frame was attached.
    BrowsingContext(BrowsingContext),
    /// A prompt opened.
    UserPromptOpened(UserPromptOpenedInfo),
    /// A prompt closed.
    UserPromptClosed(UserPromptClosedInfo),
    /// A log entry was produced by one of this context's realms.
    Log(LogEntry),
    /// The context closed. Terminal.
    Closed {
        /// Why it closed.
        reason: String,
    },
}

// ============================================================================
// BrowsingContext
// ============================================================================

/// A tab, window or frame.
#[derive(Clone)]
pub struct BrowsingContext {
    inner: Arc<BrowsingContextInner>,
}

struct BrowsingContextInner {
    id: BrowsingContextId,
    user_context: UserContextId,
    parent: Option<BrowsingContextId>,
    original_opener: Option<BrowsingContextId>,
    connection: Connection,
    options: Arc<BidiOptions>,
    url: Mutex<String>,
    lifecycle: Lifecycle<BrowsingContextEvent>,
    children: Mutex<Vec<BrowsingContext>>,
    navigations: Mutex<FxHashMap<NavigationId, Navigation>>,
    default_realm: Realm,
    sandbox_realms: Mutex<FxHashMap<String, Realm>>,
    scope: ListenerScope,
}

impl fmt::Debug for BrowsingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowsingContext")
            .field("id", &self.inner.id)
            .field("url", &*self.inner.url.lock())
            .field("parent", &self.inner.parent)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl BrowsingContext {
    pub(crate) fn new(info: &ContextInfo, connection: Connection, options: Arc<BidiOptions>) -> Self {
        let default_realm = Realm::window(
            info.context.clone(),
            None,
            connection.clone(),
            Arc::clone(&options),
        );

        let context = Self {
            inner: Arc::new(BrowsingContextInner {
                id: info.context.clone(),
                user_context: info.user_context.clone(),
                parent: info.parent.clone(),
                original_opener: info.original_opener.clone(),
                connection: connection.clone(),
                options,
                url: Mutex::new(info.url.clone()),
                lifecycle: Lifecycle::new(),
                children: Mutex::new(Vec::new()),
                navigations: Mutex::new(FxHashMap::default()),
                default_realm,
                sandbox_realms: Mutex::new(FxHashMap::default()),
                scope: ListenerScope::new(connection),
            }),
        };

        context.register_listeners();
        context
    }

    fn register_listeners(&self) {
        for event in CONTEXT_EVENTS {
            let weak: Weak<BrowsingContextInner> = Arc::downgrade(&self.inner);
            self.inner.scope.on(event, move |event| {
                if let Some(inner) = weak.upgrade() {
                    BrowsingContext { inner }.handle_event(event);
                }
            });
        }
    }

    fn handle_event(&self, event: &ParsedEvent) {
        if !self.inner.lifecycle.is_open() {
            return;
        }
        let id = &self.inner.id;

        match event {
            ParsedEvent::ContextCreated(info) if info.parent.as_ref() == Some(id) => {
                self.adopt_child(info);
            }
            ParsedEvent::ContextDestroyed(info) if &info.context == id => {
                self.dispose(CLOSED_REASON);
            }
            ParsedEvent::NavigationStarted(info) if &info.context == id => {
                let navigation = Navigation::new(info.navigation.clone(), info.url.clone());
                let superseded: Vec<Navigation> = {
                    let mut navigations = self.inner.navigations.lock();
                    let superseded = navigations
                        .extract_if(|navigation_id, _| {
                            Some(navigation_id) != info.navigation.as_ref()
                        })
                        .map(|(_, navigation)| navigation)
                        .collect();
                    if let Some(navigation_id) = &info.navigation {
                        navigations.insert(navigation_id.clone(), navigation.clone());
                    }
                    superseded
                };
                // A newer navigation replaces every open one.
                for stale in superseded {
                    stale.settle(NavigationOutcome::Aborted);
                }
                trace!(context = %id, url = %info.url, "Navigation started");
                self.emit(BrowsingContextEvent::Navigation(navigation));
            }
            ParsedEvent::FragmentNavigated(info) if &info.context == id => {
                self.set_url(&info.url);
                self.settle_navigation(info, NavigationOutcome::Fragment);
                self.emit(BrowsingContextEvent::FragmentNavigated(info.clone()));
            }
            ParsedEvent::HistoryUpdated(info) if &info.context == id => {
                self.set_url(&info.url);
                self.emit(BrowsingContextEvent::HistoryUpdated {
                    url: info.url.clone(),
                });
            }
            ParsedEvent::DomContentLoaded(info) if &info.context == id => {
                self.set_url(&info.url);
                self.emit(BrowsingContextEvent::DomContentLoaded(info.clone()));
            }
            ParsedEvent::Load(info) if &info.context == id => {
                self.set_url(&info.url);
                self.settle_navigation(info, NavigationOutcome::Loaded);
                self.emit(BrowsingContextEvent::Load(info.clone()));
            }
            ParsedEvent::NavigationFailed(info) if &info.context == id => {
                self.settle_navigation(info, NavigationOutcome::Failed);
                self.emit(BrowsingContextEvent::NavigationFailed(info.clone()));
            }
            ParsedEvent::NavigationAborted(info) if &info.context == id => {
                self.settle_navigation(info, NavigationOutcome::Aborted);
                self.emit(BrowsingContextEvent::NavigationAborted(info.clone()));
            }
            ParsedEvent::UserPromptOpened(info) if &info.context == id => {
                self.emit(BrowsingContextEvent::UserPromptOpened(info.clone()));
            }
            ParsedEvent::UserPromptClosed(info) if &info.context == id => {
                self.emit(BrowsingContextEvent::UserPromptClosed(info.clone()));
            }
            ParsedEvent::LogEntryAdded(entry) if entry.source.context.as_ref() == Some(id) => {
                self.emit(BrowsingContextEvent::Log(entry.clone()));
            }
            _ => {}
        }
    }

    fn emit(&self, event: BrowsingContextEvent) {
        self.inner.lifecycle.emit(&event);
    }

    fn set_url(&self, url: &str) {
        *self.inner.url.lock() = url.to_string();
    }

    fn settle_navigation(&self, info: &NavigationInfo, outcome: NavigationOutcome) {
        let Some(navigation_id) = &info.navigation else {
            return;
        };
        let navigation = self.inner.navigations.lock().remove(navigation_id);
        if let Some(navigation) = navigation {
            navigation.settle(outcome);
        }
    }

    fn adopt_child(&self, info: &ContextInfo) {
        let child = {
            let mut children = self.inner.children.lock();
            if children.iter().any(|c| c.id() == &info.context) {
                return;
            }
            let child = BrowsingContext::new(
                info,
                self.inner.connection.clone(),
                Arc::clone(&self.inner.options),
            );
            children.push(child.clone());
            child
        };

        let weak: Weak<BrowsingContextInner> = Arc::downgrade(&self.inner);
        let child_id = child.id().clone();
        child.on(move |event| {
            if let BrowsingContextEvent::Closed { .. } = event
                && let Some(inner) = weak.upgrade()
            {
                inner.children.lock().retain(|c| c.id() != &child_id);
            }
        });

        debug!(context = %self.inner.id, child = %child.id(), "Frame attached");
        self.emit(BrowsingContextEvent::BrowsingContext(child));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the context id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &BrowsingContextId {
        &self.inner.id
    }

    /// Returns the owning user context id.
    #[inline]
    #[must_use]
    pub fn user_context_id(&self) -> &UserContextId {
        &self.inner.user_context
    }

    /// Returns the parent id, `None` for top-level contexts.
    #[inline]
    #[must_use]
    pub fn parent_id(&self) -> Option<&BrowsingContextId> {
        self.inner.parent.as_ref()
    }

    /// Returns `true` for tabs and windows.
    #[inline]
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Returns the context that opened this one.
    #[inline]
    #[must_use]
    pub fn original_opener(&self) -> Option<&BrowsingContextId> {
        self.inner.original_opener.as_ref()
    }

    /// Returns the current URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.inner.url.lock().clone()
    }

    /// Returns the attached child frames.
    #[must_use]
    pub fn children(&self) -> Vec<BrowsingContext> {
        self.inner.children.lock().clone()
    }

    /// Returns the in-flight navigations.
    #[must_use]
    pub fn navigations(&self) -> Vec<Navigation> {
        self.inner.navigations.lock().values().cloned().collect()
    }

    /// Returns the main-world realm.
    #[inline]
    #[must_use]
    pub fn default_realm(&self) -> &Realm {
        &self.inner.default_realm
    }

    /// Returns a sandboxed realm, creating it on first use.
    ///
    /// A random sandbox name is generated when `sandbox` is `None`.
    #[must_use]
    pub fn create_window_realm(&self, sandbox: Option<&str>) -> Realm {
        let name = sandbox.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        self.inner
            .sandbox_realms
            .lock()
            .entry(name.clone())
            .or_insert_with(|| {
                Realm::window(
                    self.inner.id.clone(),
                    Some(name),
                    self.inner.connection.clone(),
                    Arc::clone(&self.inner.options),
                )
            })
            .clone()
    }

    /// Returns `true` once the context has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.inner.lifecycle.is_open()
    }

    /// Returns why the context closed.
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.inner.lifecycle.reason()
    }

    /// Registers an event listener.
    pub fn on(
        &self,
        listener: impl Fn(&BrowsingContextEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.lifecycle.on(listener)
    }

    /// Removes an event listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.lifecycle.off(id)
    }

    // ========================================================================
    // Disposal
    // ========================================================================

    /// Disposes children, navigations and realms, then emits
    /// [`BrowsingContextEvent::Closed`].
    pub(crate) fn dispose(&self, reason: &str) {
        let Some(guard) = self.inner.lifecycle.begin_close(reason) else {
            return;
        };
        debug!(context = %self.inner.id, %reason, "Disposing browsing context");

        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children {
            child.dispose(PARENT_DISPOSED_REASON);
        }

        let navigations: Vec<Navigation> = self
            .inner
            .navigations
            .lock()
            .drain()
            .map(|(_, navigation)| navigation)
            .collect();
        for navigation in navigations {
            navigation.settle(NavigationOutcome::Aborted);
        }

        let sandboxes: Vec<Realm> = self
            .inner
            .sandbox_realms
            .lock()
            .drain()
            .map(|(_, realm)| realm)
            .collect();
        for realm in sandboxes {
            realm.dispose(reason);
        }
        self.inner.default_realm.dispose(reason);

        self.inner.scope.release();
        guard.finish(BrowsingContextEvent::Closed {
            reason: reason.to_string(),
        });
    }
}
