//! Consent OTP domain type.
//!
//! A [`ConsentOtp`] is a time-boxed one-time numeric code gating a secondary
//! provider's access when patient consent is required. Rows are append-only
//! audit trail: they are created by request/resend, mutated only by
//! verification (success or failure) or invalidation, and never deleted.
//!
//! # Invariant
//!
//! At most one OTP per assignment is *live*
//! (`!is_verified && !is_blocked && expires_at > now`) at any instant.
//! Issuing or resending always invalidates prior unresolved rows first;
//! the storage layer enforces this atomically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::CoreError;

/// Length of a consent code: six decimal digits.
pub const OTP_CODE_LENGTH: usize = 6;

/// How the consent code reaches the patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMethod {
    /// Code sent by SMS.
    SmsOtp,
    /// Code sent by email.
    EmailOtp,
    /// Code read to the patient face to face.
    InPerson,
    /// Code read to the patient over the phone.
    PhoneCall,
}

impl Default for ConsentMethod {
    fn default() -> Self {
        Self::EmailOtp
    }
}

impl fmt::Display for ConsentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SmsOtp => "sms_otp",
            Self::EmailOtp => "email_otp",
            Self::InPerson => "in_person",
            Self::PhoneCall => "phone_call",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConsentMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms_otp" => Ok(Self::SmsOtp),
            "email_otp" => Ok(Self::EmailOtp),
            "in_person" => Ok(Self::InPerson),
            "phone_call" => Ok(Self::PhoneCall),
            other => Err(CoreError::invalid_consent_method(other)),
        }
    }
}

/// Who performed a successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierParty {
    /// The patient entered the code themself.
    Patient,
    /// A provider party to the assignment entered it on the patient's
    /// behalf (in-person / phone ceremony).
    Provider,
}

impl fmt::Display for VerifierParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patient => write!(f, "patient"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

/// A one-time consent code bound to an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentOtp {
    /// Unique identifier for this OTP row.
    pub id: Uuid,

    /// The assignment this code authorizes.
    pub assignment_id: Uuid,

    /// The six-digit numeric code. Handed to the notification port for
    /// out-of-band delivery; callers never see it in production responses.
    pub code: String,

    /// How the code was (to be) delivered.
    pub delivery_method: ConsentMethod,

    /// When the code was generated.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the code stops being accepted. `created_at` + the configured
    /// TTL (canonical 15 minutes).
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Failed verification attempts so far.
    pub verification_attempts: u32,

    /// Attempts after which the code blocks itself.
    pub max_attempts: u32,

    /// Set once verification succeeded. Never unset.
    pub is_verified: bool,

    /// Set when the attempt cap is reached or the code is invalidated by a
    /// resend. Never unset.
    pub is_blocked: bool,

    /// When verification succeeded.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub verified_at: Option<OffsetDateTime>,

    /// Who verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<VerifierParty>,

    /// Out-of-band delivery reported a failure. The row stays usable; the
    /// caller is expected to resend.
    pub delivery_failed: bool,
}

impl ConsentOtp {
    /// Returns `true` if the code is past its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the code can still be verified at `now`:
    /// unresolved, unblocked and unexpired.
    #[must_use]
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        !self.is_verified && !self.is_blocked && !self.is_expired(now)
    }

    /// Returns `true` if the code is unresolved (neither verified nor
    /// blocked), regardless of expiry.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        !self.is_verified && !self.is_blocked
    }

    /// Verification attempts left before the code blocks.
    #[must_use]
    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.verification_attempts)
    }
}

/// Validates the shape of a submitted code: exactly six ASCII digits.
pub fn validate_code_format(code: &str) -> Result<(), CoreError> {
    if code.len() != OTP_CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::invalid_otp_code(format!(
            "code must be exactly {OTP_CODE_LENGTH} digits"
        )));
    }
    Ok(())
}
