//! Driver entry point and configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Driver`] | Connects and builds object trees |
//! | [`DriverBuilder`] | Fluent configuration builder |
//! | [`BidiOptions`] | Timeouts, capabilities and subscriptions |
//!
//! # Example
//!
//! ```no_run
//! use bidi_webdriver::{Driver, Result};
//!
//! # async fn example() -> Result<()> {
//! let driver = Driver::builder()
//!     .ws_url("ws://127.0.0.1:9222/session")
//!     .build()?;
//!
//! let browser = driver.connect().await?;
//! let context = browser.browsing_contexts().remove(0);
//! context.navigate("https://example.com", Default::default()).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for driver configuration.
pub mod builder;

/// Core driver implementation.
pub mod core;

/// Client options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::DriverBuilder;
pub use self::core::Driver;
pub use options::BidiOptions;
