//! Storage error types for the consent storage abstraction layer.

use std::fmt;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested row was not found.
    #[error("Not found: {what}/{id}")]
    NotFound {
        /// What kind of row was missing ("Assignment", "ConsentOtp").
        what: String,
        /// The id that was looked up.
        id: String,
    },

    /// A conditional update lost its compare-and-swap guard: another writer
    /// resolved the row first.
    #[error("Version conflict: {message}")]
    VersionConflict {
        /// Description of the lost race.
        message: String,
    },

    /// Attempted to create a row that structurally duplicates an existing
    /// active one.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the duplicate.
        message: String,
    },

    /// The row data is invalid for the requested operation.
    #[error("Invalid row: {message}")]
    InvalidRow {
        /// Description of why the row is invalid.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(what: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            what: what.into(),
            id: id.to_string(),
        }
    }

    /// Creates a new `VersionConflict` error.
    #[must_use]
    pub fn version_conflict(message: impl Into<String>) -> Self {
        Self::VersionConflict {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRow` error.
    #[must_use]
    pub fn invalid_row(message: impl Into<String>) -> Self {
        Self::InvalidRow {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a version conflict error.
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Returns `true` if this is a structural conflict error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
