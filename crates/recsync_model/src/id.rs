//! Record identifier.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable natural key of a syncable object.
///
/// A record ID pairs the object's type name with its identifier. It is
/// shared by the local and the remote store and is:
/// - Compared and hashed on both fields
/// - Immutable once assigned
/// - Never reused across unrelated objects
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    record_type: String,
    identifier: String,
}

impl RecordId {
    /// Creates a record ID from a type name and an identifier.
    pub fn new(record_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Parses the `type/identifier` form produced by `Display`.
    ///
    /// The identifier may itself contain `/`; only the first separator splits.
    pub fn parse(value: &str) -> ModelResult<Self> {
        let (record_type, identifier) =
            value
                .split_once('/')
                .ok_or_else(|| ModelError::InvalidIdentifier {
                    message: format!("expected `type/identifier`, got `{value}`"),
                })?;
        let id = Self::new(record_type, identifier);
        if !id.is_valid() {
            return Err(ModelError::InvalidIdentifier {
                message: format!("empty component in `{value}`"),
            });
        }
        Ok(id)
    }

    /// Returns the record type name.
    #[must_use]
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Returns the identifier within the type.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns true if neither component is empty.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.record_type.is_empty() && !self.identifier.is_empty()
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({}/{})", self.record_type, self.identifier)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.identifier)
    }
}
