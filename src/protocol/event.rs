//! Event message types.
//!
//! Events are notifications pushed by the remote end. The connection parses
//! each event once into a [`ParsedEvent`] and hands the same value to every
//! listener registered for its method name.
//!
//! # Event Types
//!
//! | Module | Events |
//! |--------|--------|
//! | `browsingContext` | `contextCreated`, `contextDestroyed`, `navigationStarted`, `fragmentNavigated`, `historyUpdated`, `domContentLoaded`, `load`, `navigationFailed`, `navigationAborted`, `userPromptOpened`, `userPromptClosed` |
//! | `script` | `realmCreated`, `realmDestroyed` |
//! | `log` | `entryAdded` |

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::identifiers::{BrowsingContextId, NavigationId, RealmId, UserContextId};

// ============================================================================
// Event Names
// ============================================================================

/// Event method names.
pub mod names {
    /// `browsingContext.contextCreated`
    pub const CONTEXT_CREATED: &str = "browsingContext.contextCreated";
    /// `browsingContext.contextDestroyed`
    pub const CONTEXT_DESTROYED: &str = "browsingContext.contextDestroyed";
    /// `browsingContext.navigationStarted`
    pub const NAVIGATION_STARTED: &str = "browsingContext.navigationStarted";
    /// `browsingContext.fragmentNavigated`
    pub const FRAGMENT_NAVIGATED: &str = "browsingContext.fragmentNavigated";
    /// `browsingContext.historyUpdated`
    pub const HISTORY_UPDATED: &str = "browsingContext.historyUpdated";
    /// `browsingContext.domContentLoaded`
    pub const DOM_CONTENT_LOADED: &str = "browsingContext.domContentLoaded";
    /// `browsingContext.load`
    pub const LOAD: &str = "browsingContext.load";
    /// `browsingContext.navigationFailed`
    pub const NAVIGATION_FAILED: &str = "browsingContext.navigationFailed";
    /// `browsingContext.navigationAborted`
    pub const NAVIGATION_ABORTED: &str = "browsingContext.navigationAborted";
    /// `browsingContext.userPromptOpened`
    pub const USER_PROMPT_OPENED: &str = "browsingContext.userPromptOpened";
    /// `browsingContext.userPromptClosed`
    pub const USER_PROMPT_CLOSED: &str = "browsingContext.userPromptClosed";
    /// `script.realmCreated`
    pub const REALM_CREATED: &str = "script.realmCreated";
    /// `script.realmDestroyed`
    pub const REALM_DESTROYED: &str = "script.realmDestroyed";
    /// `log.entryAdded`
    pub const LOG_ENTRY_ADDED: &str = "log.entryAdded";
}

// ============================================================================
// Event
// ============================================================================

/// A raw event notification.
///
/// # Format
///
/// ```json
/// {
///   "type": "event",
///   "method": "module.eventName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name in `module.eventName` format.
    pub method: String,

    /// Event-specific data.
    pub params: Value,
}

impl Event {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Returns the module name from the method.
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the event name from the method.
    #[inline]
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.method.split('.').nth(1).unwrap_or_default()
    }

    /// Parses the event into a typed variant.
    ///
    /// Unknown methods and params that fail to decode produce
    /// [`ParsedEvent::Unknown`].
    #[must_use]
    pub fn parse(self) -> ParsedEvent {
        use names::*;

        let Self { method, params } = self;
        let parsed = match method.as_str() {
            CONTEXT_CREATED => decode(&params).map(ParsedEvent::ContextCreated),
            CONTEXT_DESTROYED => decode(&params).map(ParsedEvent::ContextDestroyed),
            NAVIGATION_STARTED => decode(&params).map(ParsedEvent::NavigationStarted),
            FRAGMENT_NAVIGATED => decode(&params).map(ParsedEvent::FragmentNavigated),
            HISTORY_UPDATED => decode(&params).map(ParsedEvent::HistoryUpdated),
            DOM_CONTENT_LOADED => decode(&params).map(ParsedEvent::DomContentLoaded),
            LOAD => decode(&params).map(ParsedEvent::Load),
            NAVIGATION_FAILED => decode(&params).map(ParsedEvent::NavigationFailed),
            NAVIGATION_ABORTED => decode(&params).map(ParsedEvent::NavigationAborted),
            USER_PROMPT_OPENED => decode(&params).map(ParsedEvent::UserPromptOpened),
            USER_PROMPT_CLOSED => decode(&params).map(ParsedEvent::UserPromptClosed),
            REALM_CREATED => decode(&params).map(ParsedEvent::RealmCreated),
            REALM_DESTROYED => decode(&params).map(ParsedEvent::RealmDestroyed),
            LOG_ENTRY_ADDED => decode(&params).map(ParsedEvent::LogEntryAdded),
            _ => None,
        };

        parsed.unwrap_or(ParsedEvent::Unknown { method, params })
    }
}

fn decode<T: DeserializeOwned>(params: &Value) -> Option<T> {
    match T::deserialize(params) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Failed to decode event params");
            None
        }
    }
}

// ============================================================================
// Event Payloads
// ============================================================================

fn default_user_context() -> UserContextId {
    UserContextId::default_context()
}

/// Browsing context description (`browsingContext.Info`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    /// Context id.
    pub context: BrowsingContextId,
    /// Current URL.
    #[serde(default)]
    pub url: String,
    /// Parent context, `None` for top-level contexts.
    #[serde(default)]
    pub parent: Option<BrowsingContextId>,
    /// Owning user context.
    #[serde(default = "default_user_context")]
    pub user_context: UserContextId,
    /// Context that opened this one.
    #[serde(default)]
    pub original_opener: Option<BrowsingContextId>,
    /// Nested contexts (from `getTree`).
    #[serde(default)]
    pub children: Option<Vec<ContextInfo>>,
}

impl ContextInfo {
    /// Creates a minimal top-level description.
    #[must_use]
    pub fn top_level(
        context: BrowsingContextId,
        user_context: UserContextId,
        url: impl Into<String>,
    ) -> Self {
        Self {
            context,
            url: url.into(),
            parent: None,
            user_context,
            original_opener: None,
            children: None,
        }
    }
}

/// Navigation progress (`browsingContext.NavigationInfo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationInfo {
    /// Navigated context.
    pub context: BrowsingContextId,
    /// Navigation attempt, absent for navigations the remote end does not track.
    #[serde(default)]
    pub navigation: Option<NavigationId>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: u64,
    /// Target URL.
    #[serde(default)]
    pub url: String,
}

/// Same-document URL change via the History API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryUpdatedInfo {
    /// Context whose URL changed.
    pub context: BrowsingContextId,
    /// New URL.
    pub url: String,
}

/// A `alert`/`confirm`/`prompt`/`beforeunload` dialog opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPromptOpenedInfo {
    /// Context showing the prompt.
    pub context: BrowsingContextId,
    /// Prompt kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Prompt message.
    #[serde(default)]
    pub message: String,
    /// Default text for `prompt()`.
    #[serde(default)]
    pub default_value: Option<String>,
}

/// A prompt was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPromptClosedInfo {
    /// Context that showed the prompt.
    pub context: BrowsingContextId,
    /// Whether it was accepted.
    pub accepted: bool,
    /// Text entered into a `prompt()`.
    #[serde(default)]
    pub user_text: Option<String>,
}

/// Kind of script realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RealmType {
    /// Window global.
    Window,
    /// Dedicated worker.
    DedicatedWorker,
    /// Shared worker.
    SharedWorker,
    /// Service worker.
    ServiceWorker,
    /// Generic worker.
    Worker,
    /// Paint worklet.
    PaintWorklet,
    /// Audio worklet.
    AudioWorklet,
    /// Generic worklet.
    Worklet,
    /// Any kind not listed above.
    #[serde(other)]
    Other,
}

/// Realm description (`script.RealmInfo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmInfo {
    /// Realm id.
    pub realm: RealmId,
    /// Serialized origin.
    #[serde(default)]
    pub origin: String,
    /// Realm kind.
    #[serde(rename = "type")]
    pub kind: RealmType,
    /// Owning context for window realms.
    #[serde(default)]
    pub context: Option<BrowsingContextId>,
    /// Sandbox name for isolated window realms.
    #[serde(default)]
    pub sandbox: Option<String>,
    /// Owning realms for workers.
    #[serde(default)]
    pub owners: Vec<RealmId>,
}

/// `script.realmDestroyed` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmDestroyedInfo {
    /// Destroyed realm.
    pub realm: RealmId,
}

/// Source of a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSource {
    /// Realm that produced the entry.
    pub realm: RealmId,
    /// Context of that realm, if any.
    #[serde(default)]
    pub context: Option<BrowsingContextId>,
}

/// `log.entryAdded` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity (`debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Producer.
    pub source: LogSource,
    /// Message text.
    #[serde(default)]
    pub text: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: u64,
    /// Entry kind (`console`, `javascript`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Typed event variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// A browsing context was created.
    ContextCreated(ContextInfo),
    /// A browsing context was destroyed.
    ContextDestroyed(ContextInfo),
    /// A navigation started.
    NavigationStarted(NavigationInfo),
    /// A same-document fragment navigation completed.
    FragmentNavigated(NavigationInfo),
    /// The URL changed through the History API.
    HistoryUpdated(HistoryUpdatedInfo),
    /// `DOMContentLoaded` fired.
    DomContentLoaded(NavigationInfo),
    /// `load` fired.
    Load(NavigationInfo),
    /// A navigation failed.
    NavigationFailed(NavigationInfo),
    /// A navigation was aborted.
    NavigationAborted(NavigationInfo),
    /// A prompt opened.
    UserPromptOpened(UserPromptOpenedInfo),
    /// A prompt closed.
    UserPromptClosed(UserPromptClosedInfo),
    /// A realm was created.
    RealmCreated(RealmInfo),
    /// A realm was destroyed.
    RealmDestroyed(RealmDestroyedInfo),
    /// A log entry was added.
    LogEntryAdded(LogEntry),
    /// Any other event.
    Unknown {
        /// Event method.
        method: String,
        /// Raw params.
        params: Value,
    },
}

impl ParsedEvent {
    /// Returns the event method name used for listener lookup.
    #[must_use]
    pub fn method(&self) -> &str {
        use names::*;

        match self {
            Self::ContextCreated(_) => CONTEXT_CREATED,
            Self::ContextDestroyed(_) => CONTEXT_DESTROYED,
            Self::NavigationStarted(_) => NAVIGATION_STARTED,
            Self::FragmentNavigated(_) => FRAGMENT_NAVIGATED,
            Self::HistoryUpdated(_) => HISTORY_UPDATED,
            Self::DomContentLoaded(_) => DOM_CONTENT_LOADED,
            Self::Load(_) => LOAD,
            Self::NavigationFailed(_) => NAVIGATION_FAILED,
            Self::NavigationAborted(_) => NAVIGATION_ABORTED,
            Self::UserPromptOpened(_) => USER_PROMPT_OPENED,
            Self::UserPromptClosed(_) => USER_PROMPT_CLOSED,
            Self::RealmCreated(_) => REALM_CREATED,
            Self::RealmDestroyed(_) => REALM_DESTROYED,
            Self::LogEntryAdded(_) => LOG_ENTRY_ADDED,
            Self::Unknown { method, .. } => method,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_event_module_and_name() {
        let event = Event::new("browsingContext.load", json!({}));
        assert_eq!(event.module(), "browsingContext");
        assert_eq!(event.event_name(), "load");
    }

    #[test]
    fn test_parse_context_created_defaults() {
        let event = Event::new(
            names::CONTEXT_CREATED,
            json!({"context": "ctx-1", "url": "about:blank", "parent": null, "children": null}),
        );

        let ParsedEvent::ContextCreated(info) = event.parse() else {
            panic!("expected contextCreated");
        };
        assert_eq!(info.context.as_str(), "ctx-1");
        assert!(info.parent.is_none());
        assert!(info.user_context.is_default());
    }

    #[test]
    fn test_parse_navigation_started() {
        let event = Event::new(
            names::NAVIGATION_STARTED,
            json!({"context": "ctx-1", "navigation": "nav-1", "timestamp": 5, "url": "https://a.test/"}),
        );

        let parsed = event.parse();
        assert_eq!(parsed.method(), names::NAVIGATION_STARTED);
        let ParsedEvent::NavigationStarted(info) = parsed else {
            panic!("expected navigationStarted");
        };
        assert_eq!(info.navigation, Some(NavigationId::new("nav-1")));
    }

    #[test]
    fn test_parse_realm_created_worker() {
        let event = Event::new(
            names::REALM_CREATED,
            json!({"realm": "w-1", "origin": "https://a.test", "type": "dedicated-worker", "owners": ["r-1"]}),
        );

        let ParsedEvent::RealmCreated(info) = event.parse() else {
            panic!("expected realmCreated");
        };
        assert_eq!(info.kind, RealmType::DedicatedWorker);
        assert_eq!(info.owners, vec![RealmId::new("r-1")]);
    }

    #[test]
    fn test_unknown_realm_type_is_other() {
        let info: RealmInfo =
            serde_json::from_value(json!({"realm": "x", "type": "brand-new-kind"})).expect("parse");
        assert_eq!(info.kind, RealmType::Other);
    }

    #[test]
    fn test_undecodable_params_become_unknown() {
        let event = Event::new(names::LOAD, json!({"url": 5}));
        let parsed = event.parse();
        assert!(matches!(parsed, ParsedEvent::Unknown { .. }));
        assert_eq!(parsed.method(), names::LOAD);
    }
}
