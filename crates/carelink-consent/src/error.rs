//! Consent ceremony error types.
//!
//! The taxonomy keeps the three user-facing refusals distinct: "wrong code,
//! try again" ([`ConsentError::IncorrectCode`]), "blocked, request a new
//! code" ([`ConsentError::OtpBlocked`]) and "rate limited, wait"
//! ([`ConsentError::RateLimited`]). Business-rule violations are typed and
//! actionable; unexpected persistence failures surface as the opaque
//! [`ConsentError::Storage`] variant after being logged with full context.

use std::time::Duration;

use carelink_storage::StorageError;

/// Errors surfaced by the consent ceremony.
#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    /// The request failed input validation.
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// The referenced row does not exist.
    #[error("Not found: {what}/{id}")]
    NotFound {
        /// What kind of row was missing.
        what: String,
        /// The id that was looked up.
        id: String,
    },

    /// A structurally duplicate active assignment, or a malformed
    /// secondary-provider reference.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The caller is not a party to the assignment, or lacks the role the
    /// operation requires.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Why the caller may not perform the operation.
        message: String,
    },

    /// OTP generation exceeded the cap for the trailing window.
    #[error("Rate limited; retry in {}s", .retry_after.as_secs())]
    RateLimited {
        /// How long until the window frees a slot.
        retry_after: Duration,
    },

    /// The submitted code did not match. The caller may try again.
    #[error("Incorrect code; {attempts_remaining} attempt(s) remaining")]
    IncorrectCode {
        /// Verification attempts left before the code blocks.
        attempts_remaining: u32,
    },

    /// The code's TTL elapsed before verification.
    #[error("OTP expired")]
    OtpExpired,

    /// The code was blocked by the attempt cap or invalidated by a resend.
    /// The caller must request a new code.
    #[error("OTP blocked; request a new code")]
    OtpBlocked,

    /// Consent is already granted; nothing was mutated.
    #[error("Consent already granted")]
    AlreadyGranted,

    /// Consent was denied by the patient; the ceremony is closed.
    #[error("Consent already denied")]
    AlreadyDenied,

    /// An unexpected persistence failure. Details are logged server-side;
    /// callers only see this opaque variant.
    #[error("Internal storage error")]
    Storage(#[source] StorageError),
}

impl ConsentError {
    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(what: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            what: what.into(),
            id: id.to_string(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Returns `true` for errors the caller can recover from by changing
    /// the request (as opposed to internal faults).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

impl From<StorageError> for ConsentError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { what, id } => Self::NotFound { what, id },
            StorageError::Conflict { message } => Self::Conflict { message },
            other => {
                tracing::error!(error = %other, "storage failure in consent operation");
                Self::Storage(other)
            }
        }
    }
}

/// Result type alias for consent operations.
pub type ConsentResult<T> = std::result::Result<T, ConsentError>;
