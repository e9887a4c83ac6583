//! Script value serialization.
//!
//! [`LocalValue`] is what the client sends as a script argument;
//! [`RemoteValue`] is what the remote end returns. Both have conversions to
//! and from plain JSON for callers that do not care about the tagged form.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::RealmId;

// ============================================================================
// LocalValue
// ============================================================================

/// A value passed into a script call.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean.
    Boolean(bool),
    /// A number, including `NaN`, `-0` and the infinities.
    Number(f64),
    /// A string.
    String(String),
    /// An array.
    Array(Vec<LocalValue>),
    /// A plain object with string keys, in insertion order.
    Object(Vec<(String, LocalValue)>),
    /// Reference to a remote object by handle.
    Handle(String),
}

impl LocalValue {
    /// Creates a handle reference.
    #[inline]
    #[must_use]
    pub fn handle(handle: impl Into<String>) -> Self {
        Self::Handle(handle.into())
    }

    /// Converts plain JSON into a local value.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Returns the protocol representation.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Undefined => json!({"type": "undefined"}),
            Self::Null => json!({"type": "null"}),
            Self::Boolean(b) => json!({"type": "boolean", "value": b}),
            Self::Number(n) => json!({"type": "number", "value": number_to_wire(*n)}),
            Self::String(s) => json!({"type": "string", "value": s}),
            Self::Array(items) => json!({
                "type": "array",
                "value": items.iter().map(Self::to_wire).collect::<Vec<_>>(),
            }),
            Self::Object(entries) => json!({
                "type": "object",
                "value": entries
                    .iter()
                    .map(|(k, v)| json!([k, v.to_wire()]))
                    .collect::<Vec<_>>(),
            }),
            Self::Handle(handle) => json!({"handle": handle}),
        }
    }
}

fn number_to_wire(n: f64) -> Value {
    if n.is_nan() {
        Value::from("NaN")
    } else if n == 0.0 && n.is_sign_negative() {
        Value::from("-0")
    } else if n.is_infinite() {
        Value::from(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl Serialize for LocalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl From<Value> for LocalValue {
    fn from(value: Value) -> Self {
        Self::from_json(&value)
    }
}

impl From<&str> for LocalValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for LocalValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for LocalValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for LocalValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for LocalValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

// ============================================================================
// RemoteValue
// ============================================================================

/// A value returned from a script call.
///
/// Nested members are kept as raw protocol JSON; use [`RemoteValue::to_json`]
/// for a plain JSON view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteValue {
    /// Value kind (`number`, `object`, `node`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Serialized value, if the kind carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Handle, present when the result was retained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Stable object id within the realm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<String>,
}

impl RemoteValue {
    /// Returns `true` for `undefined` and `null`.
    #[inline]
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        self.kind == "undefined" || self.kind == "null"
    }

    /// Converts to plain JSON.
    ///
    /// Non-finite numbers, nodes, functions and other non-serializable
    /// kinds become `null`. Dates are returned as their ISO string and
    /// regular expressions as `/pattern/flags`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        remote_to_json(&self.kind, self.value.as_ref())
    }
}

fn remote_to_json(kind: &str, value: Option<&Value>) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };

    match kind {
        "string" | "boolean" | "date" => value.clone(),
        "bigint" => value.clone(),
        "number" => match value {
            Value::String(s) if s == "-0" => json!(0),
            Value::String(_) => Value::Null,
            other => other.clone(),
        },
        "array" | "set" => match value {
            Value::Array(items) => Value::Array(items.iter().map(nested_to_json).collect()),
            _ => Value::Null,
        },
        "object" | "map" => match value {
            Value::Array(entries) => {
                let mut map = Map::new();
                for entry in entries {
                    if let Some([key, item]) = entry.as_array().map(Vec::as_slice) {
                        let key = match key {
                            Value::String(s) => s.clone(),
                            other => nested_to_json(other).to_string(),
                        };
                        map.insert(key, nested_to_json(item));
                    }
                }
                Value::Object(map)
            }
            _ => Value::Null,
        },
        "regexp" => {
            let pattern = value.get("pattern").and_then(Value::as_str).unwrap_or_default();
            let flags = value.get("flags").and_then(Value::as_str).unwrap_or_default();
            Value::from(format!("/{pattern}/{flags}"))
        }
        _ => Value::Null,
    }
}

fn nested_to_json(value: &Value) -> Value {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    remote_to_json(kind, value.get("value"))
}

// ============================================================================
// EvaluateResult
// ============================================================================

/// Exception raised by a script call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    /// Exception text.
    #[serde(default)]
    pub text: String,
    /// Line number.
    #[serde(default)]
    pub line_number: u64,
    /// Column number.
    #[serde(default)]
    pub column_number: u64,
}

/// Result of `script.evaluate` and `script.callFunction`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EvaluateResult {
    /// Completed normally.
    Success {
        /// Returned value.
        result: RemoteValue,
        /// Realm the call ran in.
        realm: RealmId,
    },
    /// Threw.
    Exception {
        /// Exception description.
        #[serde(rename = "exceptionDetails")]
        exception_details: ExceptionDetails,
        /// Realm the call ran in.
        realm: RealmId,
    },
}

impl EvaluateResult {
    /// Returns the realm the call ran in.
    #[inline]
    #[must_use]
    pub fn realm(&self) -> &RealmId {
        match self {
            Self::Success { realm, .. } | Self::Exception { realm, .. } => realm,
        }
    }

    /// Converts an exception into [`Error::ScriptError`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScriptError`] if the script threw.
    pub fn into_result(self) -> Result<RemoteValue> {
        match self {
            Self::Success { result, .. } => Ok(result),
            Self::Exception {
                exception_details, ..
            } => Err(Error::script_error(exception_details.text)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
