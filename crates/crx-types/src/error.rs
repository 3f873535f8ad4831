use thiserror::Error;

use crate::value::PropertyType;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("cannot convert {from} value to {to}: {reason}")]
    Conversion {
        from: PropertyType,
        to: PropertyType,
        reason: String,
    },

    #[error("unknown property type: {0}")]
    UnknownType(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid name pattern: {0}")]
    InvalidPattern(String),

    #[error("value is empty")]
    EmptyValue,
}
