//! Error types for the tabsync engine.

use thiserror::Error;

/// All possible errors from the tabsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid high-water mark: {0}")]
    InvalidHighWaterMark(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::MissingRequiredField("first_name".into());
        assert_eq!(err.to_string(), "missing required field: first_name");

        let err = Error::InvalidHighWaterMark("abc".into());
        assert_eq!(err.to_string(), "invalid high-water mark: abc");

        let err = Error::TypeMismatch {
            field: "age".into(),
            expected: "Int".into(),
            got: "String".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'age': expected Int, got String"
        );
    }
}
