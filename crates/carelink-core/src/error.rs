use thiserror::Error;

/// Core error types for CareLink domain operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid assignment type: {0}")]
    InvalidAssignmentType(String),

    #[error("Invalid consent status: {0}")]
    InvalidConsentStatus(String),

    #[error("Invalid consent method: {0}")]
    InvalidConsentMethod(String),

    #[error("Invalid OTP code: {message}")]
    InvalidOtpCode { message: String },
}

impl CoreError {
    /// Create a new InvalidAssignmentType error
    pub fn invalid_assignment_type(kind: impl Into<String>) -> Self {
        Self::InvalidAssignmentType(kind.into())
    }

    /// Create a new InvalidConsentStatus error
    pub fn invalid_consent_status(status: impl Into<String>) -> Self {
        Self::InvalidConsentStatus(status.into())
    }

    /// Create a new InvalidConsentMethod error
    pub fn invalid_consent_method(method: impl Into<String>) -> Self {
        Self::InvalidConsentMethod(method.into())
    }

    /// Create a new InvalidOtpCode error
    pub fn invalid_otp_code(message: impl Into<String>) -> Self {
        Self::InvalidOtpCode {
            message: message.into(),
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
