//! Builder pattern for driver configuration.
//!
//! Provides a fluent API for configuring and creating [`Driver`] instances.
//!
//! # Example
//!
//! ```no_run
//! use bidi_webdriver::Driver;
//!
//! # fn example() -> bidi_webdriver::Result<()> {
//! let driver = Driver::builder()
//!     .ws_url("ws://127.0.0.1:9222/session")
//!     .protocol_debug(true)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

use super::core::Driver;
use super::options::BidiOptions;

// ============================================================================
// DriverBuilder
// ============================================================================

/// Builder for configuring a [`Driver`] instance.
///
/// Use [`Driver::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct DriverBuilder {
    /// WebSocket endpoint of the remote end.
    ws_url: Option<String>,
    /// Client options.
    options: BidiOptions,
}

// ============================================================================
// DriverBuilder Implementation
// ============================================================================

impl DriverBuilder {
    /// Creates a builder with default options and no endpoint.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the WebSocket endpoint (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BidiOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the default command timeout.
    #[inline]
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = timeout;
        self
    }

    /// Enables protocol frame tracing.
    #[inline]
    #[must_use]
    pub fn protocol_debug(mut self, enabled: bool) -> Self {
        self.options.protocol_debug = enabled;
        self
    }

    /// Builds the driver with validation.
    ///
    /// A driver without an endpoint can still connect through
    /// [`Driver::connect_with_transport`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint is not a valid `ws`/`wss` URL.
    pub fn build(self) -> Result<Driver> {
        let ws_url = self.validate_ws_url()?;
        Ok(Driver::new(ws_url, self.options))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl DriverBuilder {
    /// Validates the endpoint.
    fn validate_ws_url(&self) -> Result<Option<Url>> {
        let Some(raw) = self.ws_url.as_deref() else {
            return Ok(None);
        };

        let url = Url::parse(raw)
            .map_err(|e| Error::config(format!("Invalid WebSocket URL '{raw}': {e}")))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "WebSocket URL must use ws:// or wss://, got '{}'.\n\
                 Example: Driver::builder().ws_url(\"ws://127.0.0.1:9222/session\")",
                url.scheme()
            )));
        }

        Ok(Some(url))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = DriverBuilder::new();
        assert!(builder.ws_url.is_none());
        assert_eq!(builder.options, BidiOptions::new());
    }

    #[test]
    fn test_build_accepts_ws_and_wss() {
        assert!(DriverBuilder::new().ws_url("ws://127.0.0.1:9222").build().is_ok());
        assert!(DriverBuilder::new().ws_url("wss://remote.example/session").build().is_ok());
    }

    #[test]
    fn test_build_rejects_http_scheme() {
        let err = DriverBuilder::new()
            .ws_url("http://127.0.0.1:9222")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("ws://"));
    }

    #[test]
    fn test_build_rejects_garbage() {
        let result = DriverBuilder::new().ws_url("not a url").build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_shortcuts_update_options() {
        let builder = DriverBuilder::new()
            .command_timeout(Duration::from_millis(250))
            .protocol_debug(true);
        assert_eq!(builder.options.command_timeout, Duration::from_millis(250));
        assert!(builder.options.protocol_debug);
    }
}
