//! Synchronous access to the async object tree.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bridge` | [`ReactorBridge`] scheduler thread and job queue |
//! | `proxy` | [`Synced`] forwarding proxies |

// ============================================================================
// Submodules
// ============================================================================

/// Reactor thread and job queue.
pub mod bridge;

/// Forwarding proxies.
pub mod proxy;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{ReactorBridge, in_reactor};
pub use proxy::{IntoSynced, Synced};
