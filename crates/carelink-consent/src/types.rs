//! Request and response types for the consent ceremony operations.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use carelink_core::{
    Assignment, AssignmentType, ConsentMethod, ConsentOtp, ConsentStatus, SecondaryProvider,
    VerifierParty,
};

/// The role under which a caller invokes the ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    /// The patient whose record is being shared.
    Patient,
    /// A healthcare provider.
    Provider,
    /// Platform administrator. May read any status and revoke any
    /// assignment, but cannot verify codes.
    Administrator,
}

/// An authenticated caller. Authentication itself happens upstream; the
/// ceremony only enforces ownership and party checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    /// The caller's user id.
    pub id: Uuid,
    /// The caller's role.
    pub role: CallerRole,
}

impl Caller {
    /// A patient caller.
    #[must_use]
    pub fn patient(id: Uuid) -> Self {
        Self {
            id,
            role: CallerRole::Patient,
        }
    }

    /// A provider caller.
    #[must_use]
    pub fn provider(id: Uuid) -> Self {
        Self {
            id,
            role: CallerRole::Provider,
        }
    }

    /// An administrator caller.
    #[must_use]
    pub fn administrator(id: Uuid) -> Self {
        Self {
            id,
            role: CallerRole::Administrator,
        }
    }
}

/// Input for creating an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentRequest {
    /// The patient whose record is being shared.
    pub patient_id: Uuid,

    /// Secondary doctor reference. Exactly one of this and
    /// `secondary_hsp_id` must be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_doctor_id: Option<Uuid>,

    /// Secondary HSP reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_hsp_id: Option<Uuid>,

    /// The role to grant. Defaults to `Specialist`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_type: Option<AssignmentType>,

    /// Why the assignment is being made. At least 10 characters.
    pub assignment_reason: String,

    /// Specialties the secondary provider is consulted for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specialty_focus: Vec<String>,

    /// Care plans shared under the assignment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub care_plan_ids: Vec<Uuid>,

    /// Administrative consent override. When present it beats the
    /// organization rule in both directions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_consent: Option<bool>,

    /// Assignment lifetime in days, 1-365. Defaults to the configured
    /// value (90 days).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_days: Option<u16>,
}

/// Outcome of creating an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentResponse {
    /// The new assignment's id.
    pub assignment_id: Uuid,
    /// Whether the consent ceremony must run before access.
    pub requires_consent: bool,
    /// Initial consent status.
    pub consent_status: ConsentStatus,
    /// Initial access flag.
    pub access_granted: bool,
    /// Whether both providers share an organization.
    pub same_organization: bool,
}

/// Input for requesting an OTP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOtpRequest {
    /// Target assignment. When absent, resolved to the caller's most
    /// recent pending assignment for `patient_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<Uuid>,

    /// The patient, required when `assignment_id` is absent and the caller
    /// is a provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<Uuid>,

    /// Delivery channel. Defaults to email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_method: Option<ConsentMethod>,

    /// Free-text note passed to the delivery adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Input for resending an OTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendOtpRequest {
    /// Target assignment; resolved like [`RequestOtpRequest::assignment_id`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<Uuid>,

    /// The patient, required when `assignment_id` is absent and the caller
    /// is a provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<Uuid>,

    /// Delivery channel. Defaults to the previous code's channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_method: Option<ConsentMethod>,

    /// Why a resend is needed. At least 5 characters.
    pub reason: String,
}

/// Outcome of issuing or resending an OTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpIssueResponse {
    /// Always `true` on success; mirrors the status read shape.
    pub otp_exists: bool,
    /// When the code stops being accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Verification attempts available on the fresh code.
    pub attempts_remaining: u32,
    /// The channel the code was handed to.
    pub delivery_method: ConsentMethod,
    /// The plaintext code. Populated only when the service is configured
    /// to expose codes (development and tests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Input for verifying an OTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    /// Target assignment; resolved like [`RequestOtpRequest::assignment_id`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<Uuid>,

    /// The patient, required when `assignment_id` is absent and the caller
    /// is a provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<Uuid>,

    /// The six-digit code.
    pub code: String,

    /// Which party performed the ceremony.
    pub verified_by: VerifierParty,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpResponse {
    /// Always `Granted` on success.
    pub consent_status: ConsentStatus,
    /// Always `true` on success.
    pub access_granted: bool,
    /// When the grant committed.
    #[serde(with = "time::serde::rfc3339")]
    pub verified_at: OffsetDateTime,
}

/// Read-only summary of an assignment's most recent OTP. Never carries
/// the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpSummary {
    /// The channel the code was sent through.
    pub delivery_method: ConsentMethod,
    /// When the code was generated.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the code stops being accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Verification attempts left.
    pub attempts_remaining: u32,
    /// Whether the code was successfully verified.
    pub is_verified: bool,
    /// Whether the code is blocked.
    pub is_blocked: bool,
    /// Whether out-of-band delivery reported a failure.
    pub delivery_failed: bool,
}

impl From<&ConsentOtp> for OtpSummary {
    fn from(otp: &ConsentOtp) -> Self {
        Self {
            delivery_method: otp.delivery_method,
            created_at: otp.created_at,
            expires_at: otp.expires_at,
            attempts_remaining: otp.attempts_remaining(),
            is_verified: otp.is_verified,
            is_blocked: otp.is_blocked,
            delivery_failed: otp.delivery_failed,
        }
    }
}

/// Read-only aggregation of an assignment and its most recent OTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentStatusView {
    /// The assignment's id.
    pub assignment_id: Uuid,
    /// The patient.
    pub patient_id: Uuid,
    /// The primary provider.
    pub primary_provider_id: Uuid,
    /// The secondary provider, when one is referenced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_provider: Option<SecondaryProvider>,
    /// The granted role.
    pub assignment_type: AssignmentType,
    /// Whether consent gates access.
    pub requires_consent: bool,
    /// Current consent status.
    pub consent_status: ConsentStatus,
    /// Current access flag.
    pub access_granted: bool,
    /// When consent was granted, if it was.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub consent_granted_at: Option<OffsetDateTime>,
    /// When the assignment lapses.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
    /// Whether the assignment is active.
    pub is_active: bool,
    /// The most recent OTP, if any was ever issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_otp: Option<OtpSummary>,
}

impl ConsentStatusView {
    /// Builds the view from an assignment and its latest OTP row.
    #[must_use]
    pub fn new(assignment: &Assignment, latest_otp: Option<&ConsentOtp>) -> Self {
        Self {
            assignment_id: assignment.id,
            patient_id: assignment.patient_id,
            primary_provider_id: assignment.primary_provider_id,
            secondary_provider: assignment.secondary_provider,
            assignment_type: assignment.assignment_type,
            requires_consent: assignment.requires_consent,
            consent_status: assignment.consent_status,
            access_granted: assignment.access_granted,
            consent_granted_at: assignment.consent_granted_at,
            expires_at: assignment.expires_at,
            is_active: assignment.is_active,
            latest_otp: latest_otp.map(OtpSummary::from),
        }
    }
}
