//! Depth-bounded decoding of JSON array responses.
//!
//! Server responses are JSON arrays whose shape the engine understands only
//! down to a fixed depth: forward-channel acks and probe responses are read
//! one level deep, back-channel frame batches three levels deep. Anything
//! below the bound is kept as an opaque [`Value::Raw`] message and handed to
//! the application untouched.

use crate::error::{DecodeError, DecodeResult};

/// Depth used for probe responses and forward-channel acks.
pub const ACK_DECODE_DEPTH: usize = 1;

/// Depth used for back-channel frame batches: `[[arrayId, payload], ...]`.
pub const FRAME_DECODE_DEPTH: usize = 3;

/// A decoded element of a server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON `null`
    Null,
    /// JSON boolean
    Bool(bool),
    /// JSON number, kept exact
    Number(serde_json::Number),
    /// JSON string
    Text(String),
    /// Array within the decode depth
    Sequence(Vec<Value>),
    /// Object, or array past the decode depth
    Raw(serde_json::Value),
}

impl Value {
    /// Convert a JSON value, expanding arrays while `depth` allows.
    fn from_json(json: serde_json::Value, depth: usize) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) if depth > 0 => Self::Sequence(
                items
                    .into_iter()
                    .map(|item| Self::from_json(item, depth - 1))
                    .collect(),
            ),
            other => Self::Raw(other),
        }
    }

    /// The string content, if this is [`Value::Text`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content of a [`Value::Number`].
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Elements of a [`Value::Sequence`].
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// First element of a sequence when it is text, e.g. `"c"` or `"stop"`.
    #[must_use]
    pub fn leading_text(&self) -> Option<&str> {
        self.as_sequence()
            .and_then(|items| items.first())
            .and_then(Value::as_str)
    }

    /// Rebuild the full JSON value.
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(b),
            Self::Number(n) => serde_json::Value::Number(n),
            Self::Text(s) => serde_json::Value::String(s),
            Self::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(Value::into_json).collect())
            }
            Self::Raw(raw) => raw,
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.into_json()
    }
}

/// Decode `text` as a JSON array, expanding nested arrays up to `max_depth`
/// levels counting the outer array itself.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidDepth`] for a zero depth,
/// [`DecodeError::Json`] for malformed input and
/// [`DecodeError::NotAnArray`] when the top-level value is not an array.
pub fn decode_array(text: &str, max_depth: usize) -> DecodeResult<Vec<Value>> {
    if max_depth == 0 {
        return Err(DecodeError::InvalidDepth);
    }

    match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .map(|item| Value::from_json(item, max_depth - 1))
            .collect()),
        other => Err(DecodeError::NotAnArray(json_kind(&other))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
