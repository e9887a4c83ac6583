//! Command frames and inbound message decoding.
//!
//! Outgoing traffic is always a [`CommandFrame`]. Inbound traffic is one of
//! three shapes, discriminated by the `type` member when present and by the
//! presence of `id`/`method` otherwise:
//!
//! | Shape | Members |
//! |-------|---------|
//! | success | `{type: "success", id, result}` |
//! | error | `{type: "error", id, error, message}` (`id` may be null) |
//! | event | `{type: "event", method, params}` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

// ============================================================================
// CommandFrame
// ============================================================================

/// A command frame sent from the client to the remote end.
///
/// # Format
///
/// ```json
/// {
///   "id": 1,
///   "method": "module.methodName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct CommandFrame<'a> {
    /// Correlation id.
    pub id: CommandId,

    /// Method in `module.methodName` format.
    pub method: &'a str,

    /// Method parameters.
    pub params: &'a Value,
}

impl<'a> CommandFrame<'a> {
    /// Creates a frame.
    #[inline]
    #[must_use]
    pub fn new(id: CommandId, method: &'a str, params: &'a Value) -> Self {
        Self { id, method, params }
    }

    /// Serializes the frame to wire text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Successful command response.
    Success {
        /// Correlation id.
        id: CommandId,
        /// Result payload.
        result: Value,
    },

    /// Error envelope, correlated to a command when `id` is present.
    Error {
        /// Correlation id, absent for uncorrelated errors.
        id: Option<CommandId>,
        /// Error code.
        error: String,
        /// Human-readable message.
        message: String,
    },

    /// Unsolicited event.
    Event {
        /// Event name in `module.eventName` format.
        method: String,
        /// Event parameters.
        params: Value,
    },
}

/// Loose view of an inbound frame before classification.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

impl Incoming {
    /// Decodes wire text into a message.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not a JSON object
    /// - [`Error::MalformedMessage`] if the object matches no known shape
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(text)?;
        Self::classify(raw)
    }

    fn classify(raw: RawMessage) -> Result<Self> {
        let kind = match raw.kind.as_deref() {
            Some(kind) => kind,
            None if raw.error.is_some() => "error",
            None if raw.id.is_some() => "success",
            None if raw.method.is_some() => "event",
            None => return Err(Error::malformed("message has no type, id or method")),
        };

        match kind {
            "success" => {
                let id = raw
                    .id
                    .ok_or_else(|| Error::malformed("success response without id"))?;
                Ok(Self::Success {
                    id: CommandId::new(id),
                    result: raw.result.unwrap_or(Value::Null),
                })
            }

            "error" => {
                let error = raw.error.unwrap_or_else(|| "unknown error".to_string());
                let message = raw.message.unwrap_or_else(|| error.clone());
                Ok(Self::Error {
                    id: raw.id.map(CommandId::new),
                    error,
                    message,
                })
            }

            "event" => {
                let method = raw
                    .method
                    .ok_or_else(|| Error::malformed("event without method"))?;
                Ok(Self::Event {
                    method,
                    params: raw.params.unwrap_or(Value::Null),
                })
            }

            other => Err(Error::malformed(format!("unknown message type: {other}"))),
        }
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
    fn test_command_frame_serialization() {
        let params = json!({"context": "ctx-1"});
        let frame = CommandFrame::new(CommandId::new(7), "browsingContext.activate", &params);
        let text = frame.to_text().expect("serialize");
        let value: Value = serde_json::from_str(&text).expect("parse");

        assert_eq!(
            value,
            json!({"id": 7, "method": "browsingContext.activate", "params": {"context": "ctx-1"}})
        );
    }

    #[test]
    fn test_success_response() {
        let incoming =
            Incoming::parse(r#"{"type":"success","id":1,"result":{"ready":true}}"#).expect("parse");
        assert_eq!(
            incoming,
            Incoming::Success {
                id: CommandId::new(1),
                result: json!({"ready": true}),
            }
        );
    }

    #[test]
    fn test_error_response() {
        let incoming = Incoming::parse(
            r#"{"type":"error","id":4,"error":"no such frame","message":"Context not found"}"#,
        )
        .expect("parse");
        assert_eq!(
            incoming,
            Incoming::Error {
                id: Some(CommandId::new(4)),
                error: "no such frame".to_string(),
                message: "Context not found".to_string(),
            }
        );
    }

    #[test]
    fn test_uncorrelated_error() {
        let incoming =
            Incoming::parse(r#"{"type":"error","id":null,"error":"invalid argument","message":"bad"}"#)
                .expect("parse");
        assert!(matches!(incoming, Incoming::Error { id: None, .. }));
    }

    #[test]
    fn test_untyped_shapes() {
        let success = Incoming::parse(r#"{"id":2,"result":{}}"#).expect("parse");
        assert!(matches!(success, Incoming::Success { .. }));

        let event =
            Incoming::parse(r#"{"method":"browsingContext.load","params":{}}"#).expect("parse");
        assert!(matches!(event, Incoming::Event { .. }));

        let error = Incoming::parse(r#"{"id":3,"error":"unknown error"}"#).expect("parse");
        assert!(matches!(
            error,
            Incoming::Error { ref message, .. } if message == "unknown error"
        ));
    }

    #[test]
    fn test_malformed_messages() {
        assert!(Incoming::parse("not json").is_err());
        assert!(matches!(
            Incoming::parse(r#"{"params":{}}"#),
            Err(Error::MalformedMessage { .. })
        ));
        assert!(matches!(
            Incoming::parse(r#"{"type":"success"}"#),
            Err(Error::MalformedMessage { .. })
        ));
    }
}
