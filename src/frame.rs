//! Wire envelope.
//!
//! Every WebSocket text frame carries one JSON object:
//!
//! ```text
//! { "topic": "<string>", "code": "<string>", "value": <any> }
//! ```
//!
//! Outbound frames always use [`CODE_PAYLOAD`]. Inbound codes are passed to
//! subscribers unchanged; the server also emits [`CODE_ERROR`] when a command
//! fails and [`CODE_END`] once it has finished handling a command.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FrameError;

/// Normal, non-error delivery.
pub const CODE_PAYLOAD: &str = "payload";

/// The server failed to handle the command; `value` carries the message.
pub const CODE_ERROR: &str = "error";

/// The server finished handling the command on this topic.
pub const CODE_END: &str = "end";

/// How strictly inbound envelopes are validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParsePolicy {
    /// `topic`, `code` and `value` must all be present.
    #[default]
    Strict,
    /// A missing `value` is read as `null`. gameapctl omits empty
    /// values on `end` and `error` frames.
    Lenient,
}

/// One envelope exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Routing key.
    pub topic: String,
    /// Status code, see the `CODE_*` constants.
    pub code: String,
    /// Arbitrary JSON payload.
    pub value: Value,
}

impl Frame {
    /// Build a frame with an explicit code.
    pub fn new(topic: impl Into<String>, code: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            topic: topic.into(),
            code: code.into(),
            value: value.into(),
        }
    }

    /// Build an outbound payload frame.
    pub fn payload(topic: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(topic, CODE_PAYLOAD, value)
    }

    /// Whether this is a normal payload delivery.
    #[must_use]
    pub fn is_payload(&self) -> bool {
        self.code == CODE_PAYLOAD
    }

    /// Whether this frame marks the end of a command's replies.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.code == CODE_END
    }

    /// Parse and validate an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] describing the first problem found.
    pub fn parse(text: &str, policy: ParsePolicy) -> Result<Self, FrameError> {
        let json: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let Value::Object(mut map) = json else {
            return Err(FrameError::NotAnObject);
        };

        let topic = take_string(&mut map, "topic")?;
        let code = take_string(&mut map, "code")?;
        let value = match (map.remove("value"), policy) {
            (Some(value), _) => value,
            (None, ParsePolicy::Lenient) => Value::Null,
            (None, ParsePolicy::Strict) => return Err(FrameError::MissingField("value")),
        };

        Ok(Self { topic, code, value })
    }

    /// Serialize to the JSON text sent over the wire.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Encode`] if serialization fails.
    pub fn to_text(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|e| FrameError::Encode(e.to_string()))
    }
}

fn take_string(
    map: &mut serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, FrameError> {
    match map.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(FrameError::InvalidField {
            field,
            expected: "string",
        }),
        None => Err(FrameError::MissingField(field)),
    }
}
