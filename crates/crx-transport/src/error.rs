//! Error types for transport operations.

use thiserror::Error;

/// Errors reported by a [`Transport`](crate::Transport) backend.
///
/// Each failure kind has its own variant so callers never need to inspect
/// messages to decide how to react.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No item exists at the path or with the identifier.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// An item already exists at the target path.
    #[error("item exists: {0}")]
    ItemExists(String),

    /// A structural or type rule was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Deleting the item would break a REFERENCE property elsewhere.
    #[error("{path} is still referenced by {referrer}")]
    ReferentialIntegrity { path: String, referrer: String },

    /// The requested workspace does not exist.
    #[error("no such workspace: {0}")]
    NoSuchWorkspace(String),

    /// The backend does not implement the operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Transaction misuse, e.g. commit without begin.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Record encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Serialization(e.to_string())
    }
}

/// Convenience type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
