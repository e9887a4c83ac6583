//! Script handles and the wait task engine.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handle` | [`JsHandle`] remote references |
//! | `poller` | [`Polling`] strategies and page-side pollers |
//! | `task_manager` | [`TaskManager`] per-realm registry |
//! | `wait_task` | [`WaitTask`] predicate polling |

// ============================================================================
// Submodules
// ============================================================================

/// Remote object handles.
pub mod handle;

/// Polling strategies and page scripts.
pub mod poller;

/// Per-realm task registry.
pub mod task_manager;

/// Predicate polling.
pub mod wait_task;

// ============================================================================
// Re-exports
// ============================================================================

pub use handle::JsHandle;
pub use poller::Polling;
pub use task_manager::TaskManager;
pub use wait_task::{WaitForOptions, WaitTask};
