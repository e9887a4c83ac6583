//! WebDriver BiDi message types.
//!
//! This module defines the JSON frames exchanged with the remote end.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `CommandFrame` | Client → Remote | Command request |
//! | `Incoming::Success` | Remote → Client | Command result |
//! | `Incoming::Error` | Remote → Client | Command failure |
//! | `Incoming::Event` | Remote → Client | Browser notification |
//!
//! # Command Naming
//!
//! Commands and events follow `module.methodName` format:
//!
//! - `browsingContext.navigate`
//! - `script.callFunction`
//! - `script.realmCreated`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Command definitions by domain |
//! | `event` | Event payloads and [`ParsedEvent`] |
//! | `request` | Command frames and inbound decoding |
//! | `value` | Script argument and result values |

// ============================================================================
// Submodules
// ============================================================================

/// Command definitions organized by module.
pub mod command;

/// Event message types.
pub mod event;

/// Command frames and inbound decoding.
pub mod request;

/// Script values.
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    BrowserCommand, BrowsingContextCommand, Command, CreateType, ImageFormat, ReadinessState,
    ResultOwnership, ScreenshotOrigin, ScriptCommand, SessionCommand, Target, Viewport,
};
pub use event::{
    ContextInfo, Event, HistoryUpdatedInfo, LogEntry, LogSource, NavigationInfo, ParsedEvent,
    RealmDestroyedInfo, RealmInfo, RealmType, UserPromptClosedInfo, UserPromptOpenedInfo, names,
};
pub use request::{CommandFrame, Incoming};
pub use value::{EvaluateResult, ExceptionDetails, LocalValue, RemoteValue};
