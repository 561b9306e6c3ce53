//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Storage and transport failures are
/// modelled by the infra and app layers and converted at their boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, rejected before any lookup happens.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced record does not exist (or is not visible to the caller's org).
    #[error("{0}")]
    NotFound(String),

    /// A record exists but belongs to another organization.
    ///
    /// Kept apart from `NotFound` so cross-org access attempts remain auditable.
    #[error("{0}")]
    CrossTenant(String),

    /// A state-machine guard or domain invariant rejected the operation.
    #[error("{0}")]
    InvariantViolation(String),

    /// Optimistic concurrency failure or duplicate write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No authenticated caller.
    #[error("unauthenticated")]
    Unauthenticated,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn cross_tenant(msg: impl Into<String>) -> Self {
        Self::CrossTenant(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
