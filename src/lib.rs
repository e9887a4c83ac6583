//! WebDriver BiDi client with a live browser object tree.
//!
//! This library speaks the WebDriver BiDi protocol over a WebSocket and keeps
//! a client-side mirror of the browser that updates itself from protocol
//! events.
//!
//! # Architecture
//!
//! - **Connection**: correlates command ids with responses and dispatches
//!   events to listeners
//! - **Object tree**: [`Session`] → [`Browser`] → [`UserContext`] →
//!   [`BrowsingContext`] → [`Realm`]; every node disposes in two phases
//!   (emit `closed`, then release)
//! - **Wait tasks**: predicates polled inside the page, rerun when their
//!   realm is replaced and terminated when it is destroyed
//! - **Reactor bridge**: a dedicated scheduler thread for synchronous callers
//!
//! # Quick Start
//!
//! ```no_run
//! use bidi_webdriver::{Driver, Result, WaitForOptions};
//! use bidi_webdriver::protocol::ReadinessState;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let driver = Driver::builder()
//!         .ws_url("ws://127.0.0.1:9222/session")
//!         .build()?;
//!
//!     let browser = driver.connect().await?;
//!     let context = browser.browsing_contexts().remove(0);
//!
//!     context.navigate("https://example.com", ReadinessState::Complete).await?;
//!     let heading = context
//!         .wait_for_function(
//!             "() => document.querySelector('h1')",
//!             Vec::new(),
//!             WaitForOptions::new(),
//!         )
//!         .await?;
//!     println!("{:?}", heading.json_value().await?);
//!
//!     browser.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`browser`] | Object tree: [`Browser`], [`BrowsingContext`], [`Realm`] |
//! | [`driver`] | Driver factory and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`reactor`] | Synchronous bridge and proxies |
//! | [`script`] | Handles, pollers and wait tasks |
//! | [`transport`] | Transports and command correlation |

// ============================================================================
// Modules
// ============================================================================

/// Browser object tree.
///
/// - [`Session`] - negotiated protocol session
/// - [`Browser`] - root of the tree
/// - [`BrowsingContext`] - tab or frame
/// - [`Realm`] - script execution context
pub mod browser;

/// Driver factory and configuration.
///
/// Use [`Driver::builder()`] to create a configured driver instance.
pub mod driver;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// WebDriver BiDi message types.
pub mod protocol;

/// Synchronous call-in over a dedicated scheduler thread.
pub mod reactor;

/// Remote handles and predicate polling.
pub mod script;

/// Transport layer and command correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Browser types
pub use browser::{
    Browser, BrowserEvent, BrowsingContext, BrowsingContextEvent, CreateContextOptions,
    Navigation, NavigationOutcome, NavigationResult, Realm, RealmEvent, Session, UserContext,
    UserContextEvent, WaitUntil,
};

// Driver types
pub use driver::{BidiOptions, Driver, DriverBuilder};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{
    BrowsingContextId, ListenerId, NavigationId, PreloadScriptId, RealmId, SessionId,
    SubscriptionId, UserContextId, WaitTaskId,
};

// Reactor types
pub use reactor::{ReactorBridge, Synced};

// Script types
pub use script::{JsHandle, Polling, WaitForOptions, WaitTask};

// Transport types
pub use transport::{Connection, Transport};
