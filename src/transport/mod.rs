//! Transport layer.
//!
//! A [`Transport`] moves text frames over a persistent bidirectional link
//! and delivers everything it receives to a single handler. The
//! [`Connection`] sits on top and owns all protocol logic.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Browser tree   │                              │  Remote end     │
//! │        │        │         WebSocket            │  (browser)      │
//! │   Connection    │◄────────────────────────────►│                 │
//! │        │        │     ws://host:port/session   │  BiDi server    │
//! │   Transport     │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | In-memory transport pair |
//! | `connection` | Command correlation and event dispatch |
//! | `tap` | Frame dump hook |
//! | `websocket` | WebSocket client transport |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// In-memory transport pair.
pub mod channel;

/// Command correlation and event dispatch.
pub mod connection;

/// Frame dump hook.
pub mod tap;

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelRemote, ChannelTransport, RemoteSender, channel_pair};
pub use connection::{CloseListener, Connection, EventListener};
pub use tap::{FrameDirection, FrameTap, TracingTap};
pub use websocket::WebSocketTransport;

// ============================================================================
// Transport Trait
// ============================================================================

/// Something delivered by a transport to its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Message(String),
    /// The link is gone. Delivered exactly once, after the last message.
    Closed {
        /// Why the link closed.
        reason: String,
    },
}

/// Callback receiving transport events in arrival order.
pub type TransportHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// A bidirectional text frame link.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts delivering inbound frames to `handler`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) if the
    /// transport was already started or is closed.
    fn start(&self, handler: TransportHandler) -> Result<()>;

    /// Sends one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed)
    /// if the link is closed.
    async fn send(&self, message: String) -> Result<()>;

    /// Closes the link. Idempotent.
    async fn close(&self);
}
