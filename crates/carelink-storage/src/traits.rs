//! Storage traits for the consent storage abstraction layer.
//!
//! This module defines the contract that all consent storage backends must
//! implement. The trait carries the operations the ceremony needs *with
//! their atomicity*: invariant-sensitive writes (issuing a live OTP,
//! recording a failed attempt, committing a verification) are single trait
//! calls so a backend can make each one a single transaction or a
//! lock-guarded critical section. The service layer never has to compose a
//! multi-write sequence that could be observed half-done.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use carelink_core::{Assignment, ConsentOtp, VerifierParty};

use crate::error::StorageResult;
use crate::types::{FailedAttempt, GenerationWindow};

/// The storage contract for assignments and consent OTPs.
///
/// Implementations must be thread-safe (`Send + Sync`) and must keep two
/// invariants under concurrent callers:
///
/// - at most one *live* OTP (unverified, unblocked, unexpired) per
///   assignment;
/// - no observable state where an OTP is verified but its assignment is
///   not granted, or vice versa.
///
/// # Example
///
/// ```ignore
/// use carelink_storage::{ConsentStore, StorageError};
///
/// async fn load(store: &dyn ConsentStore, id: uuid::Uuid) -> Result<carelink_core::Assignment, StorageError> {
///     store
///         .get_assignment(id)
///         .await?
///         .ok_or_else(|| StorageError::not_found("Assignment", id))
/// }
/// ```
#[async_trait]
pub trait ConsentStore: Send + Sync {
    // ==================== Assignment operations ====================

    /// Persists a new assignment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if an active assignment already
    /// exists for the same patient and secondary provider, or if the
    /// assignment is a second active primary for the patient.
    async fn create_assignment(&self, assignment: &Assignment) -> StorageResult<Assignment>;

    /// Reads an assignment by id. Returns `None` if it does not exist.
    async fn get_assignment(&self, id: Uuid) -> StorageResult<Option<Assignment>>;

    /// Finds the active assignments for a patient in which `provider_id`
    /// is a party (primary or secondary).
    async fn find_active_for_patient(
        &self,
        patient_id: Uuid,
        provider_id: Uuid,
    ) -> StorageResult<Vec<Assignment>>;

    /// Finds the most recently created active assignment for
    /// `patient_id` + `provider_id` still awaiting consent. Used to resolve
    /// OTP operations that do not name an assignment explicitly.
    async fn find_latest_pending(
        &self,
        patient_id: Uuid,
        provider_id: Uuid,
    ) -> StorageResult<Option<Assignment>>;

    /// Deactivates an assignment. Once inactive it grants nothing,
    /// whatever its consent status.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the assignment does not exist.
    async fn deactivate_assignment(&self, id: Uuid) -> StorageResult<Assignment>;

    /// Marks a stale assignment's consent as expired and voids access.
    /// Idempotent: marking an already-expired assignment is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the assignment does not exist.
    async fn mark_assignment_expired(&self, id: Uuid) -> StorageResult<()>;

    /// Lists active assignments whose consent is still pending and whose
    /// `expires_at` lies at or before `now`. Feeds the expiry sweep.
    async fn find_stale_pending(&self, now: OffsetDateTime) -> StorageResult<Vec<Assignment>>;

    // ==================== OTP operations ====================

    /// Installs `otp` as the single live OTP for its assignment: atomically
    /// blocks every currently unresolved OTP row for the assignment, then
    /// inserts the new row. Old rows are kept as audit trail, never deleted.
    async fn put_live_otp(&self, otp: &ConsentOtp) -> StorageResult<ConsentOtp>;

    /// Reads an OTP row by id. Returns `None` if it does not exist.
    async fn get_otp(&self, id: Uuid) -> StorageResult<Option<ConsentOtp>>;

    /// Finds the most recently created OTP row for an assignment,
    /// regardless of its state. Used for status reads and for telling
    /// "expired" apart from "blocked" apart from "never issued".
    async fn find_latest_otp(&self, assignment_id: Uuid) -> StorageResult<Option<ConsentOtp>>;

    /// Atomically increments an OTP's failed-attempt counter, blocking the
    /// code when the counter reaches its cap.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the OTP does not exist.
    /// Returns `StorageError::VersionConflict` if the OTP was resolved
    /// (verified or blocked) before the increment could apply.
    async fn record_failed_attempt(&self, otp_id: Uuid) -> StorageResult<FailedAttempt>;

    /// Counts OTP rows created for an assignment at or after `since`,
    /// resolved or not. Committed rows are the rate-limit ground truth;
    /// overcounting under races is acceptable, undercounting is not.
    async fn count_generations_since(
        &self,
        assignment_id: Uuid,
        since: OffsetDateTime,
    ) -> StorageResult<GenerationWindow>;

    /// Flags an OTP row's out-of-band delivery as failed. Does not touch
    /// the code's verifiability.
    async fn mark_delivery_failed(&self, otp_id: Uuid) -> StorageResult<()>;

    // ==================== Atomic grant commit ====================

    /// The single commit point of the ceremony. In one transaction:
    ///
    /// - compare-and-swap the OTP from `is_verified == false` to `true`,
    ///   recording `verified_at = now` and `verified_by`;
    /// - set the assignment to `consent_status = Granted`,
    ///   `access_granted = true`, `consent_granted_at = now`,
    ///   `expires_at = consent_valid_until`.
    ///
    /// Returns the updated pair. No partial state may ever be observable.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if either row does not exist.
    /// Returns `StorageError::VersionConflict` if the CAS guard fails
    /// (another caller already verified) or the OTP is blocked.
    async fn commit_verification(
        &self,
        assignment_id: Uuid,
        otp_id: Uuid,
        verified_by: VerifierParty,
        now: OffsetDateTime,
        consent_valid_until: OffsetDateTime,
    ) -> StorageResult<(Assignment, ConsentOtp)>;
}
