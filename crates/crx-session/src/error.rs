//! Error types for session operations.

use crx_transport::TransportError;
use crx_types::TypeError;
use thiserror::Error;

/// Errors surfaced by sessions, nodes and properties.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Nothing exists at the requested path.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// The item could not be resolved below the session layer.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// An item already exists at the target path.
    #[error("item exists: {0}")]
    ItemExists(String),

    /// A structural or type rule was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The item was removed in this session.
    #[error("invalid item state: {0}")]
    InvalidItemState(String),

    /// The path is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The session was logged out.
    #[error("session is not live")]
    NotLive,

    /// Session bookkeeping is inconsistent. Indicates a defect, not a user error.
    #[error("internal error: {0}")]
    Internal(String),

    /// A backend failure, passed through unchanged.
    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error(transparent)]
    Type(TypeError),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl RepositoryError {
    /// Report a lookup miss as `PathNotFound`, the way the session API does.
    pub fn into_path_not_found(self) -> Self {
        match self {
            RepositoryError::ItemNotFound(p) => RepositoryError::PathNotFound(p),
            other => other,
        }
    }
}

impl From<TransportError> for RepositoryError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ItemNotFound(p) => RepositoryError::ItemNotFound(p),
            TransportError::ItemExists(p) => RepositoryError::ItemExists(p),
            TransportError::ConstraintViolation(m) => RepositoryError::ConstraintViolation(m),
            other => RepositoryError::Transport(other),
        }
    }
}

impl From<TypeError> for RepositoryError {
    fn from(e: TypeError) -> Self {
        match e {
            TypeError::InvalidPath(p) => RepositoryError::InvalidPath(p),
            other => RepositoryError::Type(other),
        }
    }
}

/// Convenience type alias for session operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_not_found_maps_to_item_not_found() {
        let e: RepositoryError = TransportError::ItemNotFound("/a".into()).into();
        assert_eq!(e, RepositoryError::ItemNotFound("/a".into()));
        assert_eq!(e.into_path_not_found(), RepositoryError::PathNotFound("/a".into()));
    }

    #[test]
    fn other_transport_errors_are_wrapped() {
        let e: RepositoryError = TransportError::Backend("down".into()).into();
        assert_eq!(e, RepositoryError::Transport(TransportError::Backend("down".into())));
        assert_eq!(e.clone().into_path_not_found(), e);
    }

    #[test]
    fn invalid_path_type_error_is_lifted() {
        let e: RepositoryError = TypeError::InvalidPath("x".into()).into();
        assert_eq!(e, RepositoryError::InvalidPath("x".into()));
        let e: RepositoryError = TypeError::EmptyValue.into();
        assert!(matches!(e, RepositoryError::Type(TypeError::EmptyValue)));
    }
}
