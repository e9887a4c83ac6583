//! Client configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use bidi_webdriver::BidiOptions;
//!
//! let options = BidiOptions::new()
//!     .with_command_timeout(Duration::from_secs(10))
//!     .with_accept_insecure_certs(true)
//!     .with_protocol_debug(true);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::transport::tap::{PROTOCOL_DEBUG_ENV, protocol_debug_from_env};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable overriding the command timeout, in milliseconds.
pub const COMMAND_TIMEOUT_ENV: &str = "BIDI_COMMAND_TIMEOUT_MS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Modules subscribed to when a browser is created.
pub const DEFAULT_SUBSCRIBE_MODULES: [&str; 3] = ["browsingContext", "script", "log"];

// ============================================================================
// BidiOptions
// ============================================================================

/// Client configuration shared by the whole object tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BidiOptions {
    /// Default deadline for a command response. Zero disables it.
    pub command_timeout: Duration,

    /// Default deadline for wait tasks. Zero disables it.
    pub wait_timeout: Duration,

    /// Deadline for navigations. Zero disables it.
    pub navigation_timeout: Duration,

    /// Trace every protocol frame.
    pub protocol_debug: bool,

    /// Accept insecure TLS certificates.
    pub accept_insecure_certs: bool,

    /// Extra capabilities merged into `alwaysMatch`.
    pub capabilities: Map<String, Value>,

    /// Modules subscribed to when the browser is created.
    pub subscribe_modules: Vec<String>,

    /// Time running bridge jobs get to finish on shutdown.
    pub bridge_shutdown_grace: Duration,
}

impl Default for BidiOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BidiOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            command_timeout: DEFAULT_TIMEOUT,
            wait_timeout: DEFAULT_TIMEOUT,
            navigation_timeout: DEFAULT_TIMEOUT,
            protocol_debug: false,
            accept_insecure_certs: false,
            capabilities: Map::new(),
            subscribe_modules: DEFAULT_SUBSCRIBE_MODULES
                .iter()
                .map(ToString::to_string)
                .collect(),
            bridge_shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Creates default options overlaid with environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new().apply_env()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BidiOptions {
    /// Sets the command timeout.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the wait task timeout.
    #[inline]
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Sets the navigation timeout.
    #[inline]
    #[must_use]
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Enables protocol frame tracing.
    #[inline]
    #[must_use]
    pub fn with_protocol_debug(mut self, enabled: bool) -> Self {
        self.protocol_debug = enabled;
        self
    }

    /// Accepts insecure certificates.
    #[inline]
    #[must_use]
    pub fn with_accept_insecure_certs(mut self, accept: bool) -> Self {
        self.accept_insecure_certs = accept;
        self
    }

    /// Adds a capability to `alwaysMatch`.
    #[inline]
    #[must_use]
    pub fn with_capability(mut self, name: impl Into<String>, value: Value) -> Self {
        self.capabilities.insert(name.into(), value);
        self
    }

    /// Replaces the subscribed modules.
    #[inline]
    #[must_use]
    pub fn with_subscribe_modules(
        mut self,
        modules: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.subscribe_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the bridge shutdown grace period.
    #[inline]
    #[must_use]
    pub fn with_bridge_shutdown_grace(mut self, grace: Duration) -> Self {
        self.bridge_shutdown_grace = grace;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl BidiOptions {
    /// Applies `BIDI_PROTOCOL_DEBUG` and `BIDI_COMMAND_TIMEOUT_MS`.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if env::var_os(PROTOCOL_DEBUG_ENV).is_some() {
            self.protocol_debug = protocol_debug_from_env();
        }
        if let Some(ms) = env::var(COMMAND_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            self.command_timeout = Duration::from_millis(ms);
        }
        self
    }

    /// Returns the `alwaysMatch` capabilities sent with `session.new`.
    #[must_use]
    pub fn capabilities_request(&self) -> Value {
        let mut capabilities = self.capabilities.clone();
        capabilities.insert("webSocketUrl".to_string(), Value::Bool(true));
        if self.accept_insecure_certs {
            capabilities.insert("acceptInsecureCerts".to_string(), Value::Bool(true));
        }
        Value::Object(capabilities)
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
    fn test_defaults() {
        let options = BidiOptions::new();
        assert_eq!(options.command_timeout, Duration::from_secs(30));
        assert_eq!(options.wait_timeout, Duration::from_secs(30));
        assert_eq!(options.navigation_timeout, Duration::from_secs(30));
        assert_eq!(options.bridge_shutdown_grace, Duration::from_secs(5));
        assert!(!options.protocol_debug);
        assert_eq!(
            options.subscribe_modules,
            vec!["browsingContext", "script", "log"]
        );
    }

    #[test]
    fn test_builder_chain() {
        let options = BidiOptions::new()
            .with_command_timeout(Duration::from_millis(50))
            .with_wait_timeout(Duration::ZERO)
            .with_protocol_debug(true)
            .with_subscribe_modules(["browsingContext"]);

        assert_eq!(options.command_timeout, Duration::from_millis(50));
        assert!(options.wait_timeout.is_zero());
        assert!(options.protocol_debug);
        assert_eq!(options.subscribe_modules, vec!["browsingContext"]);
    }

    #[test]
    fn test_capabilities_request() {
        let options = BidiOptions::new()
            .with_accept_insecure_certs(true)
            .with_capability("browserName", json!("firefox"));

        let request = options.capabilities_request();
        assert_eq!(request["webSocketUrl"], true);
        assert_eq!(request["acceptInsecureCerts"], true);
        assert_eq!(request["browserName"], "firefox");
    }
}
