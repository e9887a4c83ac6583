//! Frame dump hook.
//!
//! The connection hands every outgoing and incoming frame to an optional
//! [`FrameTap`] before any protocol handling. [`TracingTap`] writes them to
//! the `bidi_webdriver::protocol` tracing target.

// ============================================================================
// Imports
// ============================================================================

use std::env;

use tracing::trace;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable enabling the protocol frame dump.
pub const PROTOCOL_DEBUG_ENV: &str = "BIDI_PROTOCOL_DEBUG";

// ============================================================================
// FrameTap
// ============================================================================

/// Direction of a frame relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Client to remote end.
    Outgoing,
    /// Remote end to client.
    Incoming,
}

impl FrameDirection {
    /// Short arrow used in logs.
    #[inline]
    #[must_use]
    pub const fn arrow(self) -> &'static str {
        match self {
            Self::Outgoing => ">>",
            Self::Incoming => "<<",
        }
    }
}

/// Observer of raw protocol frames.
pub trait FrameTap: Send + Sync {
    /// Called with every frame, in order, before it is handled.
    fn frame(&self, direction: FrameDirection, frame: &str);
}

// ============================================================================
// TracingTap
// ============================================================================

/// Logs frames at `trace` level under target `bidi_webdriver::protocol`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTap;

impl FrameTap for TracingTap {
    fn frame(&self, direction: FrameDirection, frame: &str) {
        trace!(
            target: "bidi_webdriver::protocol",
            direction = direction.arrow(),
            frame = %frame,
            "Protocol frame"
        );
    }
}

/// Returns `true` if [`PROTOCOL_DEBUG_ENV`] is set to `1`, `true` or `yes`.
#[must_use]
pub fn protocol_debug_from_env() -> bool {
    env::var(PROTOCOL_DEBUG_ENV).is_ok_and(|value| is_truthy(&value))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_arrows() {
        assert_eq!(FrameDirection::Outgoing.arrow(), ">>");
        assert_eq!(FrameDirection::Incoming.arrow(), "<<");
    }
}
