//! Entry point that establishes sessions.
//!
//! The [`Driver`] owns configuration only. Each `connect*` call opens a new
//! connection, negotiates a session and returns the root of a fresh tree.
//!
//! # Example
//!
//! ```no_run
//! use bidi_webdriver::Driver;
//!
//! # async fn example() -> bidi_webdriver::Result<()> {
//! let driver = Driver::builder()
//!     .ws_url("ws://127.0.0.1:9222/session")
//!     .build()?;
//!
//! let browser = driver.connect().await?;
//! println!("{} {}", browser.browser_name(), browser.browser_version());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::browser::{Browser, Session};
use crate::error::{Error, Result};
use crate::reactor::{ReactorBridge, Synced};
use crate::transport::{Connection, FrameTap, Transport, TracingTap, WebSocketTransport};

use super::builder::DriverBuilder;
use super::options::BidiOptions;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the driver.
struct DriverInner {
    /// WebSocket endpoint, if configured.
    ws_url: Option<Url>,

    /// Options shared by every tree this driver creates.
    options: Arc<BidiOptions>,
}

// ============================================================================
// Driver
// ============================================================================

/// WebDriver BiDi client factory.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

// ============================================================================
// Driver - Display
// ============================================================================

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("ws_url", &self.inner.ws_url.as_ref().map(Url::as_str))
            .field("options", &self.inner.options)
            .finish()
    }
}

// ============================================================================
// Driver - Public API
// ============================================================================

impl Driver {
    /// Creates a configuration builder for the driver.
    #[inline]
    #[must_use]
    pub fn builder() -> DriverBuilder {
        DriverBuilder::new()
    }

    pub(crate) fn new(ws_url: Option<Url>, options: BidiOptions) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                ws_url,
                options: Arc::new(options),
            }),
        }
    }

    /// Returns the configured options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BidiOptions {
        &self.inner.options
    }

    /// Connects over WebSocket and builds the object tree.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no endpoint was configured
    /// - [`Error::WebSocket`] if the handshake fails
    /// - Any error of [`Driver::connect_with_transport`]
    pub async fn connect(&self) -> Result<Browser> {
        let url = self.inner.ws_url.as_ref().ok_or_else(|| {
            Error::config(
                "WebSocket URL is required. Use .ws_url() to set it.\n\
                 Example: Driver::builder().ws_url(\"ws://127.0.0.1:9222/session\")",
            )
        })?;

        info!(url = %url, "Connecting");
        let transport = WebSocketTransport::connect(url).await?;
        self.connect_with_transport(Arc::new(transport)).await
    }

    /// Negotiates a session over an already open transport.
    ///
    /// The connection is closed again if the session cannot be set up.
    ///
    /// # Errors
    ///
    /// Returns an error if `session.new` or tree seeding fails.
    pub async fn connect_with_transport(&self, transport: Arc<dyn Transport>) -> Result<Browser> {
        let options = Arc::clone(&self.inner.options);
        let tap = options
            .protocol_debug
            .then(|| Arc::new(TracingTap) as Arc<dyn FrameTap>);

        let connection = Connection::new(transport, options.command_timeout, tap)?;

        match establish(&connection, options).await {
            Ok(browser) => Ok(browser),
            Err(e) => {
                debug!(error = %e, "Session setup failed");
                connection.close().await;
                Err(e)
            }
        }
    }

    /// Connects from synchronous code.
    ///
    /// Spawns a reactor bridge; the returned proxy owns it and tears it down
    /// on `close()` or `disconnect()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge cannot start or [`Driver::connect`]
    /// fails.
    pub fn connect_sync(&self) -> Result<Synced<Browser>> {
        let bridge = Arc::new(ReactorBridge::spawn(
            self.inner.options.bridge_shutdown_grace,
        )?);

        let driver = self.clone();
        match bridge.sync(move || async move { driver.connect().await }) {
            Ok(browser) => Ok(Synced::owning(browser, bridge)),
            Err(e) => {
                bridge.close();
                Err(e)
            }
        }
    }
}

async fn establish(connection: &Connection, options: Arc<BidiOptions>) -> Result<Browser> {
    let session = Session::from(connection.clone(), options.capabilities_request()).await?;
    Browser::from(&session, options).await
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_url_is_config_error() {
        let driver = Driver::builder().build().expect("builder");
        let err = driver.connect().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_debug_shows_endpoint() {
        let driver = Driver::builder()
            .ws_url("ws://127.0.0.1:9222/session")
            .build()
            .expect("builder");
        let debug = format!("{driver:?}");
        assert!(debug.contains("127.0.0.1:9222"));
    }
}
