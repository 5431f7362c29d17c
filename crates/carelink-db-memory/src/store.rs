use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use papaya::HashMap as PapayaHashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use carelink_core::{Assignment, AssignmentType, ConsentOtp, ConsentStatus, VerifierParty};
use carelink_storage::{
    ConsentStore, FailedAttempt, GenerationWindow, StorageError, StorageResult,
};

/// In-memory consent storage backend using papaya lock-free HashMaps.
///
/// Reads go straight to the maps. Invariant-sensitive writes (creation
/// conflict checks, OTP issuance, attempt counting, the grant commit) are
/// serialized through a per-scope async mutex: assignment-scoped writes
/// lock on the assignment id, creation locks on the patient id. Two
/// concurrent resends therefore cannot both install a live OTP, and the
/// grant commit's compare-and-swap guard is checked under the same lock
/// that every other mutator holds.
#[derive(Debug, Default)]
pub struct InMemoryConsentStore {
    /// Assignment rows keyed by assignment id.
    assignments: Arc<PapayaHashMap<Uuid, Assignment>>,
    /// OTP rows keyed by OTP id. Append-only audit trail; rows are mutated
    /// in place but never removed.
    otps: Arc<PapayaHashMap<Uuid, ConsentOtp>>,
    /// Write locks, keyed by assignment id (or patient id for creation).
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl InMemoryConsentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, scope: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(scope)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn otps_for_assignment(&self, assignment_id: Uuid) -> Vec<ConsentOtp> {
        let guard = self.otps.pin();
        guard
            .iter()
            .filter(|(_, otp)| otp.assignment_id == assignment_id)
            .map(|(_, otp)| otp.clone())
            .collect()
    }
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn create_assignment(&self, assignment: &Assignment) -> StorageResult<Assignment> {
        // Serialize creations per patient so two racing requests cannot
        // both pass the duplicate scan.
        let lock = self.lock_for(assignment.patient_id);
        let _guard = lock.lock().await;

        let guard = self.assignments.pin();
        for (_, existing) in guard.iter() {
            if !existing.is_active || existing.patient_id != assignment.patient_id {
                continue;
            }
            if assignment.assignment_type == AssignmentType::Primary
                && existing.assignment_type == AssignmentType::Primary
            {
                return Err(StorageError::conflict(format!(
                    "patient {} already has an active primary assignment",
                    assignment.patient_id
                )));
            }
            if let (Some(new_sp), Some(old_sp)) =
                (assignment.secondary_provider, existing.secondary_provider)
                && new_sp.id == old_sp.id
            {
                return Err(StorageError::conflict(format!(
                    "provider {} already has an active assignment for patient {}",
                    new_sp.id, assignment.patient_id
                )));
            }
        }

        guard.insert(assignment.id, assignment.clone());
        Ok(assignment.clone())
    }

    async fn get_assignment(&self, id: Uuid) -> StorageResult<Option<Assignment>> {
        let guard = self.assignments.pin();
        Ok(guard.get(&id).cloned())
    }

    async fn find_active_for_patient(
        &self,
        patient_id: Uuid,
        provider_id: Uuid,
    ) -> StorageResult<Vec<Assignment>> {
        let guard = self.assignments.pin();
        let mut found: Vec<Assignment> = guard
            .iter()
            .filter(|(_, a)| {
                a.is_active && a.patient_id == patient_id && a.involves_provider(provider_id)
            })
            .map(|(_, a)| a.clone())
            .collect();
        found.sort_by_key(|a| a.created_at);
        Ok(found)
    }

    async fn find_latest_pending(
        &self,
        patient_id: Uuid,
        provider_id: Uuid,
    ) -> StorageResult<Option<Assignment>> {
        let guard = self.assignments.pin();
        Ok(guard
            .iter()
            .filter(|(_, a)| {
                a.is_active
                    && a.requires_consent
                    && a.consent_status == ConsentStatus::Pending
                    && a.patient_id == patient_id
                    && a.involves_provider(provider_id)
            })
            .max_by_key(|(_, a)| a.created_at)
            .map(|(_, a)| a.clone()))
    }

    async fn deactivate_assignment(&self, id: Uuid) -> StorageResult<Assignment> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let guard = self.assignments.pin();
        let mut assignment = guard
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("Assignment", id))?;
        assignment.is_active = false;
        guard.insert(id, assignment.clone());
        Ok(assignment)
    }

    async fn mark_assignment_expired(&self, id: Uuid) -> StorageResult<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let guard = self.assignments.pin();
        let mut assignment = guard
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("Assignment", id))?;
        // Idempotent, and a grant that won the race is left alone.
        if assignment.consent_status != ConsentStatus::Pending {
            return Ok(());
        }
        assignment.consent_status = ConsentStatus::Expired;
        assignment.access_granted = false;
        guard.insert(id, assignment);
        Ok(())
    }

    async fn find_stale_pending(&self, now: OffsetDateTime) -> StorageResult<Vec<Assignment>> {
        let guard = self.assignments.pin();
        Ok(guard
            .iter()
            .filter(|(_, a)| {
                a.is_active && a.consent_status == ConsentStatus::Pending && a.is_expired(now)
            })
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn put_live_otp(&self, otp: &ConsentOtp) -> StorageResult<ConsentOtp> {
        let lock = self.lock_for(otp.assignment_id);
        let _guard = lock.lock().await;

        let guard = self.otps.pin();
        // Invalidate every unresolved row first so at most one live OTP
        // exists per assignment. Rows stay in the map as audit trail.
        let unresolved: Vec<ConsentOtp> = guard
            .iter()
            .filter(|(_, o)| o.assignment_id == otp.assignment_id && o.is_unresolved())
            .map(|(_, o)| o.clone())
            .collect();
        for mut stale in unresolved {
            stale.is_blocked = true;
            guard.insert(stale.id, stale);
        }

        guard.insert(otp.id, otp.clone());
        Ok(otp.clone())
    }

    async fn get_otp(&self, id: Uuid) -> StorageResult<Option<ConsentOtp>> {
        let guard = self.otps.pin();
        Ok(guard.get(&id).cloned())
    }

    async fn find_latest_otp(&self, assignment_id: Uuid) -> StorageResult<Option<ConsentOtp>> {
        Ok(self
            .otps_for_assignment(assignment_id)
            .into_iter()
            .max_by_key(|otp| otp.created_at))
    }

    async fn record_failed_attempt(&self, otp_id: Uuid) -> StorageResult<FailedAttempt> {
        let assignment_id = {
            let guard = self.otps.pin();
            guard
                .get(&otp_id)
                .map(|otp| otp.assignment_id)
                .ok_or_else(|| StorageError::not_found("ConsentOtp", otp_id))?
        };
        let lock = self.lock_for(assignment_id);
        let _guard = lock.lock().await;

        let guard = self.otps.pin();
        let mut otp = guard
            .get(&otp_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("ConsentOtp", otp_id))?;
        if otp.is_verified || otp.is_blocked {
            return Err(StorageError::version_conflict(
                "OTP already resolved; attempt not recorded",
            ));
        }

        otp.verification_attempts += 1;
        if otp.verification_attempts >= otp.max_attempts {
            otp.is_blocked = true;
        }
        let outcome = FailedAttempt {
            attempts: otp.verification_attempts,
            blocked: otp.is_blocked,
            attempts_remaining: otp.attempts_remaining(),
        };
        guard.insert(otp_id, otp);
        Ok(outcome)
    }

    async fn count_generations_since(
        &self,
        assignment_id: Uuid,
        since: OffsetDateTime,
    ) -> StorageResult<GenerationWindow> {
        let mut window = GenerationWindow::empty();
        for otp in self.otps_for_assignment(assignment_id) {
            if otp.created_at >= since {
                window.count += 1;
                window.oldest_created_at = Some(match window.oldest_created_at {
                    Some(oldest) if oldest <= otp.created_at => oldest,
                    _ => otp.created_at,
                });
            }
        }
        Ok(window)
    }

    async fn mark_delivery_failed(&self, otp_id: Uuid) -> StorageResult<()> {
        let assignment_id = {
            let guard = self.otps.pin();
            guard
                .get(&otp_id)
                .map(|otp| otp.assignment_id)
                .ok_or_else(|| StorageError::not_found("ConsentOtp", otp_id))?
        };
        // Same lock as the attempt counter; an unlocked read-clone-insert
        // here could erase a concurrent increment on the same row.
        let lock = self.lock_for(assignment_id);
        let _guard = lock.lock().await;

        let guard = self.otps.pin();
        let mut otp = guard
            .get(&otp_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("ConsentOtp", otp_id))?;
        otp.delivery_failed = true;
        guard.insert(otp_id, otp);
        Ok(())
    }

    async fn commit_verification(
        &self,
        assignment_id: Uuid,
        otp_id: Uuid,
        verified_by: VerifierParty,
        now: OffsetDateTime,
        consent_valid_until: OffsetDateTime,
    ) -> StorageResult<(Assignment, ConsentOtp)> {
        let lock = self.lock_for(assignment_id);
        let _guard = lock.lock().await;

        let otp_guard = self.otps.pin();
        let mut otp = otp_guard
            .get(&otp_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("ConsentOtp", otp_id))?;
        // CAS guard: exactly one caller may flip is_verified.
        if otp.is_verified {
            return Err(StorageError::version_conflict("OTP already verified"));
        }
        if otp.is_blocked {
            return Err(StorageError::version_conflict("OTP is blocked"));
        }

        let assignment_guard = self.assignments.pin();
        let mut assignment = assignment_guard
            .get(&assignment_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("Assignment", assignment_id))?;

        otp.is_verified = true;
        otp.verified_at = Some(now);
        otp.verified_by = Some(verified_by);

        assignment.consent_status = ConsentStatus::Granted;
        assignment.access_granted = true;
        assignment.consent_granted_at = Some(now);
        assignment.expires_at = Some(consent_valid_until);

        // Assignment first: a racing reader may briefly see a granted
        // assignment with an unresolved OTP, never the reverse.
        assignment_guard.insert(assignment_id, assignment.clone());
        otp_guard.insert(otp_id, otp.clone());
        Ok((assignment, otp))
    }
}
