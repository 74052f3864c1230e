//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The VM name is missing.
    #[error("name is required")]
    NameRequired,

    /// The VM namespace is missing.
    #[error("namespace is required")]
    NamespaceRequired,

    /// The UID segment is present but empty.
    #[error("uid is required")]
    UidRequired,

    /// The VM ID does not have two or three `/`-separated parts.
    #[error("unexpected vmid format: {actual}")]
    InvalidFormat { actual: String },

    /// The ID has an invalid prefix.
    #[error("invalid ID prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The ULID portion of the ID is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if a required component of a VM ID was missing.
    pub fn is_missing_component(&self) -> bool {
        matches!(
            self,
            IdError::NameRequired | IdError::NamespaceRequired | IdError::UidRequired
        )
    }
}
