//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID has an invalid prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ID is missing the underscore separator.
    #[error("ID missing underscore separator")]
    MissingSeparator,

    /// The ULID portion of the ID is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// An application path does not start at the root.
    #[error("application path must be absolute: '{0}'")]
    NotAbsolute(String),

    /// An application path segment is empty, reserved or malformed.
    #[error("invalid path segment '{segment}' in '{path}'")]
    InvalidSegment { path: String, segment: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error came from application path validation.
    pub fn is_path_error(&self) -> bool {
        matches!(self, IdError::NotAbsolute(_) | IdError::InvalidSegment { .. })
    }
}
