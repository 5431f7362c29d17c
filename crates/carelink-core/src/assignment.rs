//! Care assignment domain type.
//!
//! An [`Assignment`] is the record granting a provider a role over a
//! patient's record. Whether the secondary provider can actually act on it
//! is decided by the consent fields, which are set at creation by the
//! access policy (see [`crate::policy`]) and only flipped afterwards by the
//! consent ceremony's atomic grant commit.
//!
//! # Invariants
//!
//! - At most one active assignment with type `Primary` per patient.
//! - Non-primary assignments reference exactly one secondary provider,
//!   either a doctor or an HSP, never both and never neither. This is
//!   unrepresentable here: [`SecondaryProvider`] couples kind and id.
//! - `access_granted == true` iff `requires_consent == false` or
//!   `consent_status == Granted`.
//! - Deactivation voids access regardless of consent status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::CoreError;

/// The role an assignment grants over a patient's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    /// The patient's primary care provider. At most one active per patient.
    Primary,
    /// A specialist brought in by the primary provider.
    Specialist,
    /// A temporary stand-in for the primary provider.
    Substitute,
    /// Care transferred to another provider; capabilities are gated on
    /// granted consent.
    Transferred,
}

impl fmt::Display for AssignmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Primary => "primary",
            Self::Specialist => "specialist",
            Self::Substitute => "substitute",
            Self::Transferred => "transferred",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AssignmentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "specialist" => Ok(Self::Specialist),
            "substitute" => Ok(Self::Substitute),
            "transferred" => Ok(Self::Transferred),
            other => Err(CoreError::invalid_assignment_type(other)),
        }
    }
}

/// What kind of secondary provider an assignment references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryProviderKind {
    /// A licensed doctor.
    Doctor,
    /// A health service provider (nurse, physiotherapist, ...).
    Hsp,
}

impl fmt::Display for SecondaryProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Doctor => write!(f, "doctor"),
            Self::Hsp => write!(f, "hsp"),
        }
    }
}

/// The secondary provider referenced by a non-primary assignment.
///
/// Coupling kind and id makes "both set" and "neither set" unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryProvider {
    /// Whether the reference points at a doctor or an HSP.
    pub kind: SecondaryProviderKind,
    /// The provider's id.
    pub id: Uuid,
}

impl SecondaryProvider {
    /// A doctor reference.
    #[must_use]
    pub fn doctor(id: Uuid) -> Self {
        Self {
            kind: SecondaryProviderKind::Doctor,
            id,
        }
    }

    /// An HSP reference.
    #[must_use]
    pub fn hsp(id: Uuid) -> Self {
        Self {
            kind: SecondaryProviderKind::Hsp,
            id,
        }
    }
}

/// Consent state of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    /// Consent is not needed (same-organization access). Stored assignments
    /// use `Granted` instead so access checks stay uniform; this variant
    /// exists for policy decisions and wire compatibility.
    NotRequired,
    /// Consent required and not yet given; the OTP ceremony is open.
    Pending,
    /// The patient granted consent.
    Granted,
    /// The patient denied consent.
    Denied,
    /// The consent window elapsed before a grant.
    Expired,
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotRequired => "not_required",
            Self::Pending => "pending",
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConsentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_required" => Ok(Self::NotRequired),
            "pending" => Ok(Self::Pending),
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            "expired" => Ok(Self::Expired),
            other => Err(CoreError::invalid_consent_status(other)),
        }
    }
}

/// The record granting a provider a role over a patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Unique identifier for this assignment.
    pub id: Uuid,

    /// The patient whose record is being shared.
    pub patient_id: Uuid,

    /// The patient's primary provider, who created the assignment.
    pub primary_provider_id: Uuid,

    /// The provider being granted a role. `None` only for the patient's own
    /// primary assignment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_provider: Option<SecondaryProvider>,

    /// The role granted.
    pub assignment_type: AssignmentType,

    /// Whether the patient must consent before access is granted.
    pub requires_consent: bool,

    /// Current consent state.
    pub consent_status: ConsentStatus,

    /// Whether the secondary provider may currently access the record.
    /// Derived: true iff consent is not required or has been granted.
    pub access_granted: bool,

    /// When consent was granted (set only by the grant commit).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub consent_granted_at: Option<OffsetDateTime>,

    /// When the assignment (or a granted consent) lapses.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,

    /// Specialties the secondary provider is being consulted for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specialty_focus: Vec<String>,

    /// Care plans shared under this assignment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub care_plan_ids: Vec<Uuid>,

    /// The user who created the assignment.
    pub created_by: Uuid,

    /// When the assignment was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Active flag. Cleared on revocation or expiry; once false the
    /// assignment grants nothing.
    pub is_active: bool,
}

impl Assignment {
    /// Returns `true` if the assignment has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Returns `true` if the secondary provider may access the record at
    /// `now`: active, not lapsed, and access granted.
    #[must_use]
    pub fn has_access(&self, now: OffsetDateTime) -> bool {
        self.is_active && !self.is_expired(now) && self.access_granted
    }

    /// Returns `true` if `provider_id` is a party to this assignment.
    #[must_use]
    pub fn involves_provider(&self, provider_id: Uuid) -> bool {
        self.primary_provider_id == provider_id
            || self.secondary_provider.is_some_and(|sp| sp.id == provider_id)
    }

    /// Checks the structural access invariant:
    /// `access_granted` iff consent is not required or has been granted.
    #[must_use]
    pub fn access_invariant_holds(&self) -> bool {
        let should_grant = !self.requires_consent || self.consent_status == ConsentStatus::Granted;
        self.access_granted == should_grant
    }
}
