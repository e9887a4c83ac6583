//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//! Remote-assigned identifiers (contexts, realms, navigations...) are opaque
//! strings; locally generated identifiers are monotonically increasing
//! integers.
//!
//! | Type | Origin | Description |
//! |------|--------|-------------|
//! | [`CommandId`] | local | Command/response correlation |
//! | [`ListenerId`] | local | Event listener registration |
//! | [`WaitTaskId`] | local | Wait task registration |
//! | [`SessionId`] | remote | Negotiated session |
//! | [`UserContextId`] | remote | Storage partition |
//! | [`BrowsingContextId`] | remote | Tab, window or frame |
//! | [`RealmId`] | remote | Script execution realm |
//! | [`NavigationId`] | remote | One navigation attempt |
//! | [`PreloadScriptId`] | remote | Registered preload script |
//! | [`SubscriptionId`] | remote | Event subscription |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// Remote Identifiers
// ============================================================================

/// Declares an opaque string identifier assigned by the remote end.
macro_rules! remote_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from its wire representation.
            #[inline]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the wire representation.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

remote_id!(
    /// Identifier of a negotiated BiDi session.
    SessionId
);

remote_id!(
    /// Identifier of a user context (isolated storage partition).
    UserContextId
);

remote_id!(
    /// Identifier of a browsing context (tab, window or frame).
    BrowsingContextId
);

remote_id!(
    /// Identifier of a script realm.
    RealmId
);

remote_id!(
    /// Identifier of a single navigation attempt.
    NavigationId
);

remote_id!(
    /// Identifier of a preload script.
    PreloadScriptId
);

remote_id!(
    /// Identifier of an event subscription.
    SubscriptionId
);

impl UserContextId {
    /// Wire id of the default user context.
    pub const DEFAULT: &'static str = "default";

    /// Returns the default user context id.
    #[inline]
    #[must_use]
    pub fn default_context() -> Self {
        Self::new(Self::DEFAULT)
    }

    /// Returns `true` if this is the default user context.
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

// ============================================================================
// Local Identifiers
// ============================================================================

/// Command identifier used for request/response correlation.
///
/// Allocated per connection, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Creates a command id from its wire value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide counter backing [`ListenerId`] and [`WaitTaskId`].
static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Declares a locally generated integer identifier.
macro_rules! local_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Generates a new unique identifier.
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed))
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

local_id!(
    /// Identifier of a registered event listener.
    ListenerId
);

local_id!(
    /// Identifier of a wait task.
    WaitTaskId
);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_id_serializes_transparently() {
        let id = BrowsingContextId::new("ctx-1");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"ctx-1\"");

        let parsed: BrowsingContextId = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_default_user_context() {
        assert!(UserContextId::default_context().is_default());
        assert!(!UserContextId::new("uc-2").is_default());
    }

    #[test]
    fn test_local_ids_are_unique() {
        let a = ListenerId::generate();
        let b = ListenerId::generate();
        let c = WaitTaskId::generate();
        assert_ne!(a, b);
        assert_ne!(a.as_u64(), c.as_u64());
        assert_ne!(b.as_u64(), c.as_u64());
    }

    #[test]
    fn test_command_id_display() {
        assert_eq!(CommandId::new(42).to_string(), "42");
    }
}
