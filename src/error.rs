//! Error types for the bus.
//!
//! Most bus operations never fail synchronously: subscribe, send and request
//! return nothing, malformed inbound frames are dropped by the router, and
//! transport failures surface through the connection's close handler. These
//! types cover the few places where a caller does get a `Result`.

/// Errors produced while decoding or encoding a wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The text was not valid JSON.
    InvalidJson(String),
    /// The JSON value was not an object.
    NotAnObject,
    /// A required envelope field was absent.
    MissingField(&'static str),
    /// An envelope field had the wrong JSON type.
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Expected JSON type.
        expected: &'static str,
    },
    /// Serializing an outbound frame failed.
    Encode(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson(msg) => write!(f, "Invalid JSON: {msg}"),
            Self::NotAnObject => write!(f, "Frame is not a JSON object"),
            Self::MissingField(field) => write!(f, "Frame is missing field `{field}`"),
            Self::InvalidField { field, expected } => {
                write!(f, "Frame field `{field}` must be a {expected}")
            }
            Self::Encode(msg) => write!(f, "Failed to encode frame: {msg}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Errors returned by the async bus helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The connection closed before a reply arrived.
    Closed,
    /// The pending subscription was removed before a reply arrived.
    Cancelled,
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Connection closed"),
            Self::Cancelled => write!(f, "Subscription cancelled before a reply arrived"),
        }
    }
}

impl std::error::Error for BusError {}
