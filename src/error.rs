//! Error types for the BiDi client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bidi_webdriver::{Error, Result};
//!
//! async fn example(context: &BrowsingContext) -> Result<()> {
//!     context.navigate("https://example.com", ReadinessState::Complete).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::BridgeClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::MalformedMessage`] |
//! | Teardown | [`Error::SessionEnded`], [`Error::BrowserClosed`], [`Error::UserContextClosed`], [`Error::BrowsingContextClosed`], [`Error::RealmDestroyed`], [`Error::FrameDetached`] |
//! | Execution | [`Error::ScriptError`], [`Error::Timeout`], [`Error::CommandTimeout`], [`Error::Aborted`] |
//! | Navigation | [`Error::NavigationFailed`], [`Error::NavigationAborted`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{BrowsingContextId, CommandId, RealmId, UserContextId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when driver configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the transport cannot be established or written to.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Command issued on, or pending during, a closed connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The reactor bridge no longer accepts jobs.
    #[error("Reactor bridge closed")]
    BridgeClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The remote end answered a command with an error envelope.
    #[error("Protocol error ({method}): {error}: {message}")]
    Protocol {
        /// Method of the failed command.
        method: String,
        /// Error code (e.g. `no such frame`).
        error: String,
        /// Human-readable message.
        message: String,
    },

    /// An inbound frame could not be interpreted.
    #[error("Malformed message: {message}")]
    MalformedMessage {
        /// Description of the problem.
        message: String,
    },

    // ========================================================================
    // Teardown Errors
    // ========================================================================
    /// The session has ended.
    #[error("Session ended: {reason}")]
    SessionEnded {
        /// Why the session ended.
        reason: String,
    },

    /// The browser has been closed or disconnected.
    #[error("Browser closed: {reason}")]
    BrowserClosed {
        /// Why the browser closed.
        reason: String,
    },

    /// The user context has been removed.
    #[error("User context {user_context} closed: {reason}")]
    UserContextClosed {
        /// The closed user context.
        user_context: UserContextId,
        /// Why it closed.
        reason: String,
    },

    /// The browsing context has been closed.
    #[error("Browsing context {context} closed: {reason}")]
    BrowsingContextClosed {
        /// The closed browsing context.
        context: BrowsingContextId,
        /// Why it closed.
        reason: String,
    },

    /// The realm has been destroyed; handles bound to it are invalid.
    #[error("Realm {realm} destroyed: {reason}")]
    RealmDestroyed {
        /// The destroyed realm (empty if it never received an id).
        realm: RealmId,
        /// Why it was destroyed.
        reason: String,
    },

    /// The frame owning an execution context went away.
    #[error("Waiting failed: Frame detached ({context})")]
    FrameDetached {
        /// The detached browsing context.
        context: BrowsingContextId,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// A script threw an exception.
    #[error("Script error: {message}")]
    ScriptError {
        /// Exception text reported by the remote end.
        message: String,
    },

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Command response not received in time.
    #[error("Command {id} ({method}) timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// The command id.
        id: CommandId,
        /// The command method.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Explicit external cancellation.
    #[error("Aborted: {operation}")]
    Aborted {
        /// The cancelled operation.
        operation: String,
    },

    // ========================================================================
    // Navigation Errors
    // ========================================================================
    /// Navigation failed.
    #[error("Navigation to {url} failed")]
    NavigationFailed {
        /// Target URL.
        url: String,
    },

    /// Navigation was aborted (e.g. superseded by another navigation).
    #[error("Navigation to {url} aborted")]
    NavigationAborted {
        /// Target URL.
        url: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error carrying the originating method.
    #[inline]
    pub fn protocol_error(
        method: impl Into<String>,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            method: method.into(),
            error: error.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed message error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }

    /// Creates a session ended error.
    #[inline]
    pub fn session_ended(reason: impl Into<String>) -> Self {
        Self::SessionEnded {
            reason: reason.into(),
        }
    }

    /// Creates a browser closed error.
    #[inline]
    pub fn browser_closed(reason: impl Into<String>) -> Self {
        Self::BrowserClosed {
            reason: reason.into(),
        }
    }

    /// Creates a user context closed error.
    #[inline]
    pub fn user_context_closed(user_context: UserContextId, reason: impl Into<String>) -> Self {
        Self::UserContextClosed {
            user_context,
            reason: reason.into(),
        }
    }

    /// Creates a browsing context closed error.
    #[inline]
    pub fn context_closed(context: BrowsingContextId, reason: impl Into<String>) -> Self {
        Self::BrowsingContextClosed {
            context,
            reason: reason.into(),
        }
    }

    /// Creates a realm destroyed error.
    #[inline]
    pub fn realm_destroyed(realm: RealmId, reason: impl Into<String>) -> Self {
        Self::RealmDestroyed {
            realm,
            reason: reason.into(),
        }
    }

    /// Creates a frame detached error.
    #[inline]
    pub fn frame_detached(context: BrowsingContextId) -> Self {
        Self::FrameDetached { context }
    }

    /// Creates a script error.
    #[inline]
    pub fn script_error(message: impl Into<String>) -> Self {
        Self::ScriptError {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a command timeout error.
    #[inline]
    pub fn command_timeout(id: CommandId, method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CommandTimeout {
            id,
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates an aborted error.
    #[inline]
    pub fn aborted(operation: impl Into<String>) -> Self {
        Self::Aborted {
            operation: operation.into(),
        }
    }

    /// Creates a navigation failed error.
    #[inline]
    pub fn navigation_failed(url: impl Into<String>) -> Self {
        Self::NavigationFailed { url: url.into() }
    }

    /// Creates a navigation aborted error.
    #[inline]
    pub fn navigation_aborted(url: impl Into<String>) -> Self {
        Self::NavigationAborted { url: url.into() }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::CommandTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::BridgeClosed
                | Self::WebSocket(_)
                | Self::ChannelClosed(_)
        )
    }

    /// Returns `true` if the error was caused by a torn-down tree node.
    #[inline]
    #[must_use]
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            Self::SessionEnded { .. }
                | Self::BrowserClosed { .. }
                | Self::UserContextClosed { .. }
                | Self::BrowsingContextClosed { .. }
                | Self::RealmDestroyed { .. }
                | Self::FrameDetached { .. }
        )
    }

    /// Returns `true` if a wait task should silently retry after this error.
    ///
    /// These errors describe an execution context that was replaced while a
    /// round trip was in flight. Nothing outside the wait task engine ever
    /// observes them.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        let text = match self {
            Self::Protocol { error, message, .. } => {
                if error == "no such frame" {
                    return true;
                }
                message.as_str()
            }
            Self::ScriptError { message } => message.as_str(),
            _ => return false,
        };

        if text.contains("Execution context is not available in detached frame") {
            return false;
        }

        RECOVERABLE_MESSAGES.iter().any(|m| text.contains(m))
    }

    /// Returns the protocol error code, if any.
    #[inline]
    #[must_use]
    pub fn protocol_code(&self) -> Option<&str> {
        match self {
            Self::Protocol { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Message fragments that identify a replaced execution context.
const RECOVERABLE_MESSAGES: &[&str] = &[
    "Execution context was destroyed",
    "Cannot find context with specified id",
    "DiscardedBrowsingContextError",
    "no such frame",
];

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_protocol_error_display() {
        let err = Error::protocol_error("browsingContext.navigate", "unknown error", "boom");
        assert_eq!(
            err.to_string(),
            "Protocol error (browsingContext.navigate): unknown error: boom"
        );
        assert_eq!(err.protocol_code(), Some("unknown error"));
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::command_timeout(CommandId::new(3), "session.status", 50);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(Error::timeout("wait", 10).is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::BridgeClosed.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_teardown() {
        let ctx = BrowsingContextId::new("ctx");
        assert!(Error::context_closed(ctx.clone(), "gone").is_teardown());
        assert!(Error::frame_detached(ctx).is_teardown());
        assert!(Error::realm_destroyed(RealmId::new("r"), "gone").is_teardown());
        assert!(!Error::ConnectionClosed.is_teardown());
    }

    #[test]
    fn test_recoverable_classification() {
        let destroyed = Error::script_error("Error: Execution context was destroyed.");
        let missing = Error::protocol_error("script.callFunction", "unknown error", "Cannot find context with specified id");
        let discarded = Error::protocol_error("script.callFunction", "unknown error", "DiscardedBrowsingContextError: gone");
        let no_frame = Error::protocol_error("script.callFunction", "no such frame", "Context not found");
        let detached = Error::script_error("Execution context is not available in detached frame");
        let other = Error::script_error("ReferenceError: foo is not defined");

        assert!(destroyed.is_recoverable());
        assert!(missing.is_recoverable());
        assert!(discarded.is_recoverable());
        assert!(no_frame.is_recoverable());
        assert!(!detached.is_recoverable());
        assert!(!other.is_recoverable());
        assert!(!Error::ConnectionClosed.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
