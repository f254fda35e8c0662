//! Domain error types
//!
//! Errors surfaced synchronously to callers of the watch set and the
//! configuration layer. Transfer failures are not represented here; they
//! are absorbed into transfer status (see [`UploadError`](super::transfer::UploadError)).

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Duplicate or malformed input (e.g. a watch name that already exists)
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The referenced item does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl DomainError {
    /// Returns true for validation-class failures, including bad paths
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::ValidationFailed(_) | DomainError::InvalidPath(_)
        )
    }

    /// Returns true if the error reports a missing item
    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::NotFound(_))
    }
}
