use thiserror::Error;

use nursery_core::DomainError;

/// Store-level error, shared by every collaborator trait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record addressed by id does not exist in the caller's organization.
    #[error("{0}")]
    NotFound(String),

    /// Stale version or duplicate key.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A guard evaluated inside the store rejected the write.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Message raised by the database (or a stored function), passed through verbatim.
    #[error("{0}")]
    Database(String),

    /// Connection, pool or (de)serialization failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub(crate) fn poisoned() -> Self {
        Self::Storage("lock poisoned".to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("payload serialization failed: {err}"))
    }
}
