//! Access policy evaluation.
//!
//! Pure function deciding, at assignment creation, whether the consent
//! ceremony is required and what the initial consent fields are. Providers
//! sharing an organization get automatic access; everything else starts
//! pending. An explicit administrative override always wins.

use serde::{Deserialize, Serialize};

use crate::assignment::ConsentStatus;

/// The outcome of evaluating the access policy for a new assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    /// Whether the patient must consent before access is granted.
    pub requires_consent: bool,
    /// Initial consent status for the stored assignment. `NotRequired` is
    /// mapped to `Granted` so access checks stay uniform.
    pub consent_status: ConsentStatus,
    /// Initial access flag.
    pub access_granted: bool,
    /// Whether both providers share an organization. Reported to callers;
    /// not itself authoritative when an override is present.
    pub same_organization: bool,
}

/// Decides the initial consent fields for an assignment.
///
/// `primary_org` and `secondary_org` are the organization ids of the two
/// providers; either may be unknown. `requires_consent_override`, when
/// present, is authoritative in both directions: `Some(false)` grants
/// immediately even across organizations, `Some(true)` forces the ceremony
/// even within one.
#[must_use]
pub fn evaluate_access_policy(
    primary_org: Option<&str>,
    secondary_org: Option<&str>,
    requires_consent_override: Option<bool>,
) -> AccessDecision {
    let same_organization = match (primary_org, secondary_org) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };

    let requires_consent = requires_consent_override.unwrap_or(!same_organization);

    if requires_consent {
        AccessDecision {
            requires_consent: true,
            consent_status: ConsentStatus::Pending,
            access_granted: false,
            same_organization,
        }
    } else {
        AccessDecision {
            requires_consent: false,
            consent_status: ConsentStatus::Granted,
            access_granted: true,
            same_organization,
        }
    }
}
