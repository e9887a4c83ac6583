//! Command definitions organized by module.
//!
//! Commands follow the `module.methodName` format. Each module enum is
//! adjacently tagged so that serializing a variant yields the `method` and
//! `params` members of the outgoing frame.
//!
//! # Command Modules
//!
//! | Module | Commands |
//! |--------|----------|
//! | `session` | New, status, subscriptions, end |
//! | `browser` | Close, user contexts |
//! | `browsingContext` | Create, navigate, close, tree, prompts, viewport |
//! | `script` | Evaluate, call function, disown, preload scripts |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::{BrowsingContextId, PreloadScriptId, RealmId, UserContextId};

use super::value::LocalValue;

// ============================================================================
// Command Wrapper
// ============================================================================

/// All protocol commands organized by module.
///
/// This enum wraps module-specific command enums for unified serialization.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Command {
    /// Session module commands.
    Session(SessionCommand),
    /// Browser module commands.
    Browser(BrowserCommand),
    /// BrowsingContext module commands.
    BrowsingContext(BrowsingContextCommand),
    /// Script module commands.
    Script(ScriptCommand),
}

impl Command {
    /// Splits the command into its method name and params object.
    ///
    /// Commands without parameters produce an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn into_parts(self) -> Result<(String, Value)> {
        let value = serde_json::to_value(&self)?;
        let Value::Object(mut object) = value else {
            return Err(Error::malformed("command did not serialize to an object"));
        };

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            _ => return Err(Error::malformed("command is missing its method")),
        };
        let params = object
            .remove("params")
            .unwrap_or_else(|| Value::Object(Map::new()));

        Ok((method, params))
    }
}

impl From<SessionCommand> for Command {
    fn from(command: SessionCommand) -> Self {
        Self::Session(command)
    }
}

impl From<BrowserCommand> for Command {
    fn from(command: BrowserCommand) -> Self {
        Self::Browser(command)
    }
}

impl From<BrowsingContextCommand> for Command {
    fn from(command: BrowsingContextCommand) -> Self {
        Self::BrowsingContext(command)
    }
}

impl From<ScriptCommand> for Command {
    fn from(command: ScriptCommand) -> Self {
        Self::Script(command)
    }
}

// ============================================================================
// Session Commands
// ============================================================================

/// Session module commands for session lifecycle and subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum SessionCommand {
    /// Negotiate a new session.
    #[serde(rename = "session.new")]
    New {
        /// Capabilities request (`alwaysMatch`/`firstMatch`).
        capabilities: Value,
    },

    /// Query remote end readiness.
    #[serde(rename = "session.status")]
    Status {},

    /// Subscribe to events.
    #[serde(rename = "session.subscribe")]
    Subscribe {
        /// Event or module names.
        events: Vec<String>,
        /// Restrict to these contexts (global if absent).
        #[serde(skip_serializing_if = "Option::is_none")]
        contexts: Option<Vec<BrowsingContextId>>,
    },

    /// Unsubscribe from events.
    #[serde(rename = "session.unsubscribe")]
    Unsubscribe {
        /// Event or module names.
        events: Vec<String>,
        /// Restrict to these contexts (global if absent).
        #[serde(skip_serializing_if = "Option::is_none")]
        contexts: Option<Vec<BrowsingContextId>>,
    },

    /// End the session.
    #[serde(rename = "session.end")]
    End {},
}

// ============================================================================
// Browser Commands
// ============================================================================

/// Browser module commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum BrowserCommand {
    /// Close the browser and all its contexts.
    #[serde(rename = "browser.close")]
    Close {},

    /// Create an isolated user context.
    #[serde(rename = "browser.createUserContext")]
    CreateUserContext {
        /// Accept insecure certificates in this user context.
        #[serde(
            rename = "acceptInsecureCerts",
            skip_serializing_if = "Option::is_none"
        )]
        accept_insecure_certs: Option<bool>,
    },

    /// List user contexts.
    #[serde(rename = "browser.getUserContexts")]
    GetUserContexts {},

    /// Remove a user context and close its browsing contexts.
    #[serde(rename = "browser.removeUserContext")]
    RemoveUserContext {
        /// User context to remove.
        #[serde(rename = "userContext")]
        user_context: UserContextId,
    },
}

// ============================================================================
// BrowsingContext Commands
// ============================================================================

/// Kind of top-level browsing context to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateType {
    /// A new tab.
    Tab,
    /// A new window.
    Window,
}

/// Document readiness a navigation command waits for before responding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    /// Respond as soon as the navigation has started.
    #[default]
    None,
    /// Respond after `DOMContentLoaded`.
    Interactive,
    /// Respond after `load`.
    Complete,
}

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels.
    pub width: u32,
    /// Height in CSS pixels.
    pub height: u32,
}

/// Area captured by a screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotOrigin {
    /// The visible viewport.
    #[default]
    Viewport,
    /// The whole document.
    Document,
}

/// Image format requested from `captureScreenshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFormat {
    /// MIME type, e.g. `image/png`.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Compression quality in `0.0..=1.0` for lossy formats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

/// BrowsingContext module commands for context management and navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum BrowsingContextCommand {
    /// Create a tab or window.
    #[serde(rename = "browsingContext.create")]
    Create {
        /// Tab or window.
        #[serde(rename = "type")]
        kind: CreateType,
        /// Context to open next to.
        #[serde(rename = "referenceContext", skip_serializing_if = "Option::is_none")]
        reference_context: Option<BrowsingContextId>,
        /// Open without activating.
        #[serde(skip_serializing_if = "Option::is_none")]
        background: Option<bool>,
        /// Owning user context.
        #[serde(rename = "userContext", skip_serializing_if = "Option::is_none")]
        user_context: Option<UserContextId>,
    },

    /// Navigate to URL.
    #[serde(rename = "browsingContext.navigate")]
    Navigate {
        /// Target context.
        context: BrowsingContextId,
        /// URL to navigate to.
        url: String,
        /// Readiness to wait for before responding.
        #[serde(skip_serializing_if = "Option::is_none")]
        wait: Option<ReadinessState>,
    },

    /// Reload the current document.
    #[serde(rename = "browsingContext.reload")]
    Reload {
        /// Target context.
        context: BrowsingContextId,
        /// Bypass the cache.
        #[serde(rename = "ignoreCache", skip_serializing_if = "Option::is_none")]
        ignore_cache: Option<bool>,
        /// Readiness to wait for before responding.
        #[serde(skip_serializing_if = "Option::is_none")]
        wait: Option<ReadinessState>,
    },

    /// Close a top-level context.
    #[serde(rename = "browsingContext.close")]
    Close {
        /// Target context.
        context: BrowsingContextId,
        /// Run `beforeunload` handlers.
        #[serde(rename = "promptUnload", skip_serializing_if = "Option::is_none")]
        prompt_unload: Option<bool>,
    },

    /// Bring a context to the foreground.
    #[serde(rename = "browsingContext.activate")]
    Activate {
        /// Target context.
        context: BrowsingContextId,
    },

    /// Move through session history.
    #[serde(rename = "browsingContext.traverseHistory")]
    TraverseHistory {
        /// Target context.
        context: BrowsingContextId,
        /// Steps to move (negative is back).
        delta: i64,
    },

    /// Accept or dismiss an open prompt.
    #[serde(rename = "browsingContext.handleUserPrompt")]
    HandleUserPrompt {
        /// Target context.
        context: BrowsingContextId,
        /// Accept (true) or dismiss (false).
        #[serde(skip_serializing_if = "Option::is_none")]
        accept: Option<bool>,
        /// Text for `prompt()` dialogs.
        #[serde(rename = "userText", skip_serializing_if = "Option::is_none")]
        user_text: Option<String>,
    },

    /// Resize the viewport.
    #[serde(rename = "browsingContext.setViewport")]
    SetViewport {
        /// Target context.
        context: BrowsingContextId,
        /// New viewport (null restores the default).
        viewport: Option<Viewport>,
        /// Device pixel ratio override.
        #[serde(
            rename = "devicePixelRatio",
            skip_serializing_if = "Option::is_none"
        )]
        device_pixel_ratio: Option<f64>,
    },

    /// Capture a screenshot, returned as base64.
    #[serde(rename = "browsingContext.captureScreenshot")]
    CaptureScreenshot {
        /// Target context.
        context: BrowsingContextId,
        /// Captured area.
        #[serde(skip_serializing_if = "Option::is_none")]
        origin: Option<ScreenshotOrigin>,
        /// Output format.
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<ImageFormat>,
    },

    /// Fetch the context tree.
    #[serde(rename = "browsingContext.getTree")]
    GetTree {
        /// Depth limit.
        #[serde(rename = "maxDepth", skip_serializing_if = "Option::is_none")]
        max_depth: Option<u32>,
        /// Subtree root.
        #[serde(skip_serializing_if = "Option::is_none")]
        root: Option<BrowsingContextId>,
    },
}

// ============================================================================
// Script Commands
// ============================================================================

/// Where a script command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// A specific realm.
    Realm {
        /// Realm id.
        realm: RealmId,
    },
    /// The current realm of a context (optionally a sandbox).
    Context {
        /// Context id.
        context: BrowsingContextId,
        /// Sandbox name.
        #[serde(skip_serializing_if = "Option::is_none")]
        sandbox: Option<String>,
    },
}

/// Whether results keep a remote handle alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultOwnership {
    /// Retain the value and return a handle.
    Root,
    /// Serialize only.
    #[default]
    None,
}

/// Script module commands for JavaScript execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum ScriptCommand {
    /// Evaluate an expression.
    #[serde(rename = "script.evaluate")]
    Evaluate {
        /// Expression source.
        expression: String,
        /// Execution target.
        target: Target,
        /// Await a returned promise.
        #[serde(rename = "awaitPromise")]
        await_promise: bool,
        /// Handle ownership of the result.
        #[serde(rename = "resultOwnership", skip_serializing_if = "Option::is_none")]
        result_ownership: Option<ResultOwnership>,
        /// Treat the call as a user gesture.
        #[serde(rename = "userActivation", skip_serializing_if = "Option::is_none")]
        user_activation: Option<bool>,
    },

    /// Call a function declaration with arguments.
    #[serde(rename = "script.callFunction")]
    CallFunction {
        /// Function source.
        #[serde(rename = "functionDeclaration")]
        function_declaration: String,
        /// Execution target.
        target: Target,
        /// Await a returned promise.
        #[serde(rename = "awaitPromise")]
        await_promise: bool,
        /// Arguments.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        arguments: Vec<LocalValue>,
        /// `this` binding.
        #[serde(rename = "this", skip_serializing_if = "Option::is_none")]
        this: Option<LocalValue>,
        /// Handle ownership of the result.
        #[serde(rename = "resultOwnership", skip_serializing_if = "Option::is_none")]
        result_ownership: Option<ResultOwnership>,
        /// Treat the call as a user gesture.
        #[serde(rename = "userActivation", skip_serializing_if = "Option::is_none")]
        user_activation: Option<bool>,
    },

    /// Release remote handles.
    #[serde(rename = "script.disown")]
    Disown {
        /// Handle ids.
        handles: Vec<String>,
        /// Realm owning the handles.
        target: Target,
    },

    /// Register a script that runs before any page script.
    #[serde(rename = "script.addPreloadScript")]
    AddPreloadScript {
        /// Function source.
        #[serde(rename = "functionDeclaration")]
        function_declaration: String,
        /// Restrict to these top-level contexts.
        #[serde(skip_serializing_if = "Option::is_none")]
        contexts: Option<Vec<BrowsingContextId>>,
        /// Restrict to these user contexts.
        #[serde(rename = "userContexts", skip_serializing_if = "Option::is_none")]
        user_contexts: Option<Vec<UserContextId>>,
        /// Sandbox to run in.
        #[serde(skip_serializing_if = "Option::is_none")]
        sandbox: Option<String>,
    },

    /// Unregister a preload script.
    #[serde(rename = "script.removePreloadScript")]
    RemovePreloadScript {
        /// Script id.
        script: PreloadScriptId,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_browsing_context_navigate() {
        let command = Command::BrowsingContext(BrowsingContextCommand::Navigate {
            context: BrowsingContextId::new("ctx-1"),
            url: "https://example.com".to_string(),
            wait: Some(ReadinessState::Complete),
        });

        let (method, params) = command.into_parts().expect("split");
        assert_eq!(method, "browsingContext.navigate");
        assert_eq!(
            params,
            json!({"context": "ctx-1", "url": "https://example.com", "wait": "complete"})
        );
    }

    #[test]
    fn test_parameterless_command_has_empty_params() {
        let (method, params) = Command::from(SessionCommand::Status {})
            .into_parts()
            .expect("split");
        assert_eq!(method, "session.status");
        assert_eq!(params, json!({}));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let command = Command::from(BrowsingContextCommand::Create {
            kind: CreateType::Tab,
            reference_context: None,
            background: None,
            user_context: Some(UserContextId::new("uc-1")),
        });

        let (_, params) = command.into_parts().expect("split");
        assert_eq!(params, json!({"type": "tab", "userContext": "uc-1"}));
    }

    #[test]
    fn test_set_viewport_keeps_null_viewport() {
        let command = Command::from(BrowsingContextCommand::SetViewport {
            context: BrowsingContextId::new("ctx-1"),
            viewport: None,
            device_pixel_ratio: None,
        });

        let (_, params) = command.into_parts().expect("split");
        assert_eq!(params, json!({"context": "ctx-1", "viewport": null}));
    }

    #[test]
    fn test_call_function_target_forms() {
        let by_realm = Command::from(ScriptCommand::CallFunction {
            function_declaration: "() => 1".to_string(),
            target: Target::Realm {
                realm: RealmId::new("realm-1"),
            },
            await_promise: false,
            arguments: vec![LocalValue::from(2.0)],
            this: None,
            result_ownership: Some(ResultOwnership::Root),
            user_activation: None,
        });

        let (method, params) = by_realm.into_parts().expect("split");
        assert_eq!(method, "script.callFunction");
        assert_eq!(params["target"], json!({"realm": "realm-1"}));
        assert_eq!(params["resultOwnership"], json!("root"));
        assert_eq!(params["arguments"], json!([{"type": "number", "value": 2.0}]));

        let by_context = Command::from(ScriptCommand::Disown {
            handles: vec!["h-1".to_string()],
            target: Target::Context {
                context: BrowsingContextId::new("ctx-1"),
                sandbox: Some("iso".to_string()),
            },
        });
        let (_, params) = by_context.into_parts().expect("split");
        assert_eq!(params["target"], json!({"context": "ctx-1", "sandbox": "iso"}));
    }
}
