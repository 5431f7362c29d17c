//! Provider capability matrix.
//!
//! A provider's capabilities over a patient's record are derived from the
//! assignment type (and, for transferred assignments, the consent status)
//! through an explicit lookup. Nothing stores capability flags; the matrix
//! is the single source of truth.
//!
//! | type        | view | create plan | modify plan | prescribe | tests | history |
//! |-------------|------|-------------|-------------|-----------|-------|---------|
//! | primary     | yes  | yes         | yes         | yes       | yes   | yes     |
//! | specialist  | yes  | yes         | yes         | yes       | yes   | yes     |
//! | substitute  | yes  | no          | yes         | yes       | yes   | yes     |
//! | transferred | everything iff consent granted, else nothing            |

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::assignment::{Assignment, AssignmentType, ConsentStatus};

/// A single thing a provider may do with a patient's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read the current record.
    View,
    /// Open a new care plan.
    CreateCarePlan,
    /// Change an existing care plan.
    ModifyCarePlan,
    /// Issue prescriptions.
    Prescribe,
    /// Order diagnostic tests.
    OrderTests,
    /// Read the full historical record.
    FullHistory,
}

impl Capability {
    /// All six capabilities, in matrix column order.
    pub const ALL: [Capability; 6] = [
        Capability::View,
        Capability::CreateCarePlan,
        Capability::ModifyCarePlan,
        Capability::Prescribe,
        Capability::OrderTests,
        Capability::FullHistory,
    ];

    fn bit(self) -> u8 {
        match self {
            Capability::View => 1 << 0,
            Capability::CreateCarePlan => 1 << 1,
            Capability::ModifyCarePlan => 1 << 2,
            Capability::Prescribe => 1 << 3,
            Capability::OrderTests => 1 << 4,
            Capability::FullHistory => 1 << 5,
        }
    }
}

/// A set of capabilities. Cheap to copy and compare.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set.
    pub const NONE: CapabilitySet = CapabilitySet(0);

    /// Every capability.
    pub const FULL: CapabilitySet = CapabilitySet(0b11_1111);

    /// Builds a set from individual capabilities.
    #[must_use]
    pub fn of(caps: &[Capability]) -> Self {
        Self(caps.iter().fold(0, |acc, c| acc | c.bit()))
    }

    /// Returns `true` if `cap` is in the set.
    #[must_use]
    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// The union of two sets.
    #[must_use]
    pub fn union(self, other: CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 | other.0)
    }

    /// Returns `true` if no capability is in the set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates over the capabilities in the set, in column order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Looks up the capability set for an assignment type and consent status.
///
/// Consent status only matters for transferred assignments, which are
/// all-or-nothing on a granted consent. Other types get their fixed row of
/// the matrix; whether the assignment as a whole grants anything at all is
/// decided upstream by its access flags.
#[must_use]
pub fn capabilities_for(
    assignment_type: AssignmentType,
    consent_status: ConsentStatus,
) -> CapabilitySet {
    match assignment_type {
        AssignmentType::Primary | AssignmentType::Specialist => CapabilitySet::FULL,
        AssignmentType::Substitute => CapabilitySet::of(&[
            Capability::View,
            Capability::ModifyCarePlan,
            Capability::Prescribe,
            Capability::OrderTests,
            Capability::FullHistory,
        ]),
        AssignmentType::Transferred => match consent_status {
            ConsentStatus::Granted => CapabilitySet::FULL,
            _ => CapabilitySet::NONE,
        },
    }
}

impl Assignment {
    /// The capabilities this assignment grants at `now`.
    ///
    /// Inactive, lapsed or unconsented assignments grant nothing; otherwise
    /// the matrix row for the assignment type applies.
    #[must_use]
    pub fn capabilities(&self, now: OffsetDateTime) -> CapabilitySet {
        if !self.has_access(now) {
            return CapabilitySet::NONE;
        }
        capabilities_for(self.assignment_type, self.consent_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::SecondaryProvider;
    use time::Duration;
    use time::macros::datetime;
    use uuid::Uuid;

    #[test]
    fn primary_and_specialist_get_everything() {
        for t in [AssignmentType::Primary, AssignmentType::Specialist] {
            let caps = capabilities_for(t, ConsentStatus::Granted);
            for cap in Capability::ALL {
                assert!(caps.contains(cap), "{t} missing {cap:?}");
            }
        }
    }

    #[test]
    fn substitute_cannot_create_care_plans() {
        let caps = capabilities_for(AssignmentType::Substitute, ConsentStatus::Granted);
        assert!(!caps.contains(Capability::CreateCarePlan));
        assert!(caps.contains(Capability::View));
        assert!(caps.contains(Capability::ModifyCarePlan));
        assert!(caps.contains(Capability::Prescribe));
        assert!(caps.contains(Capability::OrderTests));
        assert!(caps.contains(Capability::FullHistory));
    }

    #[test]
    fn transferred_is_all_or_nothing_on_consent() {
        let granted = capabilities_for(AssignmentType::Transferred, ConsentStatus::Granted);
        assert_eq!(granted, CapabilitySet::FULL);

        for status in [
            ConsentStatus::Pending,
            ConsentStatus::Denied,
            ConsentStatus::Expired,
            ConsentStatus::NotRequired,
        ] {
            let caps = capabilities_for(AssignmentType::Transferred, status);
            assert!(caps.is_empty(), "transferred with {status} should grant nothing");
        }
    }

    #[test]
    fn inactive_assignment_grants_nothing() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let mut a = Assignment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            primary_provider_id: Uuid::new_v4(),
            secondary_provider: Some(SecondaryProvider::doctor(Uuid::new_v4())),
            assignment_type: AssignmentType::Specialist,
            requires_consent: false,
            consent_status: ConsentStatus::Granted,
            access_granted: true,
            consent_granted_at: None,
            expires_at: Some(now + Duration::days(90)),
            specialty_focus: Vec::new(),
            care_plan_ids: Vec::new(),
            created_by: Uuid::new_v4(),
            created_at: now,
            is_active: true,
        };
        assert_eq!(a.capabilities(now), CapabilitySet::FULL);

        a.is_active = false;
        assert!(a.capabilities(now).is_empty());
    }

    #[test]
    fn capability_set_iterates_in_column_order() {
        let caps = CapabilitySet::of(&[Capability::FullHistory, Capability::View]);
        let collected: Vec<_> = caps.iter().collect();
        assert_eq!(collected, vec![Capability::View, Capability::FullHistory]);
    }
}
