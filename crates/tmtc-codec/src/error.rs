//! Error types for message codecs.

use thiserror::Error;
use tmtc_common::ValueError;

/// Errors that can occur when building, decoding or encoding messages.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// The message definition itself is invalid.
    #[error("invalid definition {id}: {reason}")]
    InvalidDefinition { id: String, reason: String },

    /// The buffer does not follow the definition's layout.
    #[error("message does not match {id}: {reason}")]
    Mismatch { id: String, reason: String },

    /// A field required for encoding is not present.
    #[error("missing field '{0}'")]
    MissingField(String),

    /// The secondary id is not defined for this message.
    #[error("unknown secondary id '{secondary_id}' for message {id}")]
    UnknownSecondaryId { id: String, secondary_id: String },

    /// A field value does not fit the declared representation.
    #[error("value for field '{field}' out of range: {reason}")]
    ValueOutOfRange { field: String, reason: String },

    /// Buffer is too short for the layout.
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// A field value could not be parsed or formatted.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// The byte stream cannot be split into frames.
    #[error("framing error: {0}")]
    Framing(String),

    /// ASCII message contents are not valid UTF-8.
    #[error("invalid UTF-8 in ASCII message")]
    InvalidUtf8,
}

/// Result type alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
