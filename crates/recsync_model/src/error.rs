//! Error types for the record model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while building, validating or encoding records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A required field is absent from an object.
    #[error("missing field `{field}` on {record_type}")]
    MissingField {
        /// Record type of the object.
        record_type: String,
        /// Name of the missing field.
        field: String,
    },

    /// A field holds a value of the wrong shape.
    #[error("invalid value for field `{field}`: {message}")]
    InvalidField {
        /// Name of the field.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// The record type is not registered.
    #[error("unknown record type: {record_type}")]
    UnknownType {
        /// The unregistered type name.
        record_type: String,
    },

    /// A record identifier is malformed.
    #[error("invalid record identifier: {message}")]
    InvalidIdentifier {
        /// Description of the problem.
        message: String,
    },

    /// A persisted status code is out of range.
    #[error("invalid status code: {code}")]
    InvalidStatusCode {
        /// The offending code.
        code: u8,
    },
}

impl ModelError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(record_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            record_type: record_type.into(),
            field: field.into(),
        }
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an unknown type error.
    pub fn unknown_type(record_type: impl Into<String>) -> Self {
        Self::UnknownType {
            record_type: record_type.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::missing_field("note", "title");
        assert_eq!(err.to_string(), "missing field `title` on note");

        let err = ModelError::InvalidStatusCode { code: 9 };
        assert!(err.to_string().contains('9'));
    }
}
