//! Live browser object tree.
//!
//! The tree mirrors browser-side state and is kept current purely from
//! protocol events:
//!
//! ```text
//! Session
//! └── Browser
//!     └── UserContext (default + created)
//!         └── BrowsingContext (tab / window)
//!             ├── BrowsingContext (frames, recursively)
//!             ├── Navigation (in flight)
//!             └── Realm (default + sandboxes)
//!                 └── Realm (dedicated workers)
//! ```
//!
//! Every node follows the two-phase disposal protocol of
//! [`lifecycle::Lifecycle`]: the terminal event is delivered to listeners
//! before the node reports itself disposed.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `context` | [`BrowsingContext`] and navigation tracking |
//! | `core` | [`Browser`] root node |
//! | `lifecycle` | Emitter and disposal protocol |
//! | `realm` | [`Realm`] script execution contexts |
//! | `session` | [`Session`] |
//! | `user_context` | [`UserContext`] storage partitions |

// ============================================================================
// Submodules
// ============================================================================

/// Browsing contexts and navigation tracking.
pub mod context;

/// Browser root node.
pub mod core;

/// Emitter and disposal protocol.
pub mod lifecycle;

/// Script realms.
pub mod realm;

/// Negotiated session.
pub mod session;

/// User contexts.
pub mod user_context;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{
    BrowsingContext, BrowsingContextEvent, NavigateResult, Navigation, NavigationOutcome,
    NavigationResult, NavigationWatcher, WaitUntil,
};
pub use self::core::{Browser, BrowserEvent};
pub use lifecycle::{CloseGuard, EventEmitter, Lifecycle, LifecycleState};
pub use realm::{Realm, RealmEvent, RealmKind};
pub use session::{Session, SessionEvent, SessionStatus};
pub use user_context::{CreateContextOptions, UserContext, UserContextEvent};
