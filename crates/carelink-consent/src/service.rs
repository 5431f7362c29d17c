//! The consent ceremony manager.
//!
//! [`ConsentService`] orchestrates assignment creation, OTP issuance,
//! resend, verification, status reads, revocation and the expiry sweep.
//! It is stateless: all state lives behind the injected
//! [`ConsentStore`], all time comes from the injected [`Clock`], and all
//! side channels (delivery, compliance logging, directory lookups) go
//! through the ports in [`crate::port`]. The service is safe to share
//! across request-handling tasks.
//!
//! # Ceremony state machine
//!
//! Per assignment/OTP pair: `NO_OTP -> OTP_PENDING -> {VERIFIED, EXPIRED,
//! BLOCKED}`. Issuance and resend move back to `OTP_PENDING` with a fresh
//! code (invalidating unresolved predecessors); the only path to
//! `VERIFIED` is the store's atomic grant commit.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use time::OffsetDateTime;
use uuid::Uuid;

use carelink_core::{
    Assignment, AssignmentType, Capability, CapabilitySet, Clock, ConsentMethod, ConsentOtp,
    ConsentStatus, SecondaryProvider, evaluate_access_policy, validate_code_format,
};
use carelink_storage::{ConsentStore, StorageError};

use crate::config::ConsentConfig;
use crate::error::{ConsentError, ConsentResult};
use crate::port::{AuditEvent, AuditOutcome, AuditSink, ConsentNotifier, ProviderDirectory};
use crate::types::{
    Caller, CallerRole, ConsentStatusView, CreateAssignmentRequest, CreateAssignmentResponse,
    OtpIssueResponse, RequestOtpRequest, ResendOtpRequest, VerifyOtpRequest, VerifyOtpResponse,
};

/// Minimum length for an assignment reason.
const MIN_REASON_LEN: usize = 10;
/// Minimum length for a resend reason.
const MIN_RESEND_REASON_LEN: usize = 5;

/// Orchestrates the patient-provider consent ceremony.
pub struct ConsentService {
    /// Assignment and OTP persistence.
    store: Arc<dyn ConsentStore>,

    /// Out-of-band code delivery.
    notifier: Arc<dyn ConsentNotifier>,

    /// Compliance logging.
    audit: Arc<dyn AuditSink>,

    /// Provider organization lookups.
    directory: Arc<dyn ProviderDirectory>,

    /// Time source.
    clock: Arc<dyn Clock>,

    /// Service configuration.
    config: ConsentConfig,
}

impl ConsentService {
    /// Creates a new service.
    ///
    /// # Errors
    ///
    /// Returns `ConsentError::Validation` if the configuration is invalid.
    pub fn new(
        store: Arc<dyn ConsentStore>,
        notifier: Arc<dyn ConsentNotifier>,
        audit: Arc<dyn AuditSink>,
        directory: Arc<dyn ProviderDirectory>,
        clock: Arc<dyn Clock>,
        config: ConsentConfig,
    ) -> ConsentResult<Self> {
        config.validate().map_err(ConsentError::validation)?;
        Ok(Self {
            store,
            notifier,
            audit,
            directory,
            clock,
            config,
        })
    }

    /// The configuration the service runs with.
    #[must_use]
    pub fn config(&self) -> &ConsentConfig {
        &self.config
    }

    // ==================== Assignment creation ====================

    /// Creates a care assignment and evaluates its initial consent fields.
    ///
    /// Same-organization pairs are granted immediately and no OTP is ever
    /// issued for them. Cross-organization (or unknown-organization) pairs
    /// start pending. An explicit `requires_consent` override wins in both
    /// directions.
    pub async fn create_assignment(
        &self,
        caller: Caller,
        request: CreateAssignmentRequest,
    ) -> ConsentResult<CreateAssignmentResponse> {
        if caller.role != CallerRole::Provider {
            return Err(ConsentError::forbidden(
                "assignments are created by the primary provider",
            ));
        }
        if request.assignment_reason.trim().len() < MIN_REASON_LEN {
            return Err(ConsentError::validation(format!(
                "assignmentReason must be at least {MIN_REASON_LEN} characters"
            )));
        }
        let expires_in_days = match request.expires_in_days {
            Some(days) if !(1..=365).contains(&days) => {
                return Err(ConsentError::validation(
                    "expiresInDays must be within 1-365",
                ));
            }
            Some(days) => days,
            None => self.config.default_assignment_expiry_days,
        };
        let secondary = match (request.secondary_doctor_id, request.secondary_hsp_id) {
            (Some(doctor), None) => SecondaryProvider::doctor(doctor),
            (None, Some(hsp)) => SecondaryProvider::hsp(hsp),
            _ => {
                return Err(ConsentError::conflict(
                    "exactly one of secondaryDoctorId and secondaryHspId must be set",
                ));
            }
        };
        if secondary.id == caller.id {
            return Err(ConsentError::conflict(
                "a provider cannot be assigned to their own patient record twice",
            ));
        }
        let assignment_type = request.assignment_type.unwrap_or(AssignmentType::Specialist);
        if assignment_type == AssignmentType::Primary {
            return Err(ConsentError::validation(
                "primary assignments are managed by patient registration, not consent sharing",
            ));
        }

        let primary_org = self.directory.organization_of(caller.id).await;
        let secondary_org = self.directory.organization_of(secondary.id).await;
        let decision = evaluate_access_policy(
            primary_org.as_deref(),
            secondary_org.as_deref(),
            request.requires_consent,
        );

        let now = self.clock.now();
        let assignment = Assignment {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            primary_provider_id: caller.id,
            secondary_provider: Some(secondary),
            assignment_type,
            requires_consent: decision.requires_consent,
            consent_status: decision.consent_status,
            access_granted: decision.access_granted,
            consent_granted_at: decision.access_granted.then_some(now),
            expires_at: Some(now + Duration::from_secs(u64::from(expires_in_days) * 86_400)),
            specialty_focus: request.specialty_focus,
            care_plan_ids: request.care_plan_ids,
            created_by: caller.id,
            created_at: now,
            is_active: true,
        };

        let created = self.store.create_assignment(&assignment).await?;
        tracing::debug!(
            assignment_id = %created.id,
            patient_id = %created.patient_id,
            requires_consent = created.requires_consent,
            same_organization = decision.same_organization,
            "assignment created"
        );
        self.record(caller.id, "assignment.create", created.id, AuditOutcome::Success)
            .await;

        Ok(CreateAssignmentResponse {
            assignment_id: created.id,
            requires_consent: created.requires_consent,
            consent_status: created.consent_status,
            access_granted: created.access_granted,
            same_organization: decision.same_organization,
        })
    }

    // ==================== OTP issuance ====================

    /// Issues a consent code for a pending assignment.
    ///
    /// If an unresolved code exists it is invalidated and replaced; the
    /// fresh code always starts with a full attempt budget and a full TTL.
    /// Generation counts toward the trailing rate-limit window.
    pub async fn request_otp(
        &self,
        caller: Caller,
        request: RequestOtpRequest,
    ) -> ConsentResult<OtpIssueResponse> {
        let assignment = self
            .resolve_target(caller, request.assignment_id, request.patient_id)
            .await?;
        let method = request.consent_method.unwrap_or_default();
        self.issue(caller, &assignment, method, "otp.request").await
    }

    /// Invalidates any unresolved code and issues a fresh one.
    ///
    /// Semantically `request_otp` with an audited reason; both share the
    /// rate-limit window.
    pub async fn resend_otp(
        &self,
        caller: Caller,
        request: ResendOtpRequest,
    ) -> ConsentResult<OtpIssueResponse> {
        if request.reason.trim().len() < MIN_RESEND_REASON_LEN {
            return Err(ConsentError::validation(format!(
                "reason must be at least {MIN_RESEND_REASON_LEN} characters"
            )));
        }
        let assignment = self
            .resolve_target(caller, request.assignment_id, request.patient_id)
            .await?;
        let method = match request.consent_method {
            Some(method) => method,
            // keep the channel of the previous code when none is chosen
            None => self
                .store
                .find_latest_otp(assignment.id)
                .await?
                .map(|otp| otp.delivery_method)
                .unwrap_or_default(),
        };
        self.issue(caller, &assignment, method, "otp.resend").await
    }

    async fn issue(
        &self,
        caller: Caller,
        assignment: &Assignment,
        method: ConsentMethod,
        action: &str,
    ) -> ConsentResult<OtpIssueResponse> {
        let now = self.clock.now();
        self.ensure_ceremony_open(assignment, now).await?;

        let window_start = now - self.config.rate_limit_window;
        let window = self
            .store
            .count_generations_since(assignment.id, window_start)
            .await?;
        if window.count >= self.config.rate_limit_max_generations {
            let retry_after = window
                .oldest_created_at
                .map(|oldest| (oldest + self.config.rate_limit_window) - now)
                .filter(|d| d.is_positive())
                .map_or(self.config.rate_limit_window, |d| d.unsigned_abs());
            tracing::warn!(
                assignment_id = %assignment.id,
                generations = window.count,
                retry_after_secs = retry_after.as_secs(),
                "OTP generation rate limit hit"
            );
            self.record(caller.id, action, assignment.id, AuditOutcome::Denied)
                .await;
            return Err(ConsentError::RateLimited { retry_after });
        }

        let otp = ConsentOtp {
            id: Uuid::new_v4(),
            assignment_id: assignment.id,
            code: generate_code(),
            delivery_method: method,
            created_at: now,
            expires_at: now + self.config.otp_ttl,
            verification_attempts: 0,
            max_attempts: self.config.max_verification_attempts,
            is_verified: false,
            is_blocked: false,
            verified_at: None,
            verified_by: None,
            delivery_failed: false,
        };
        let stored = self.store.put_live_otp(&otp).await?;
        tracing::debug!(
            assignment_id = %assignment.id,
            otp_id = %stored.id,
            method = %method,
            "consent code issued"
        );
        self.record(caller.id, action, assignment.id, AuditOutcome::Success)
            .await;

        // The code is committed at this point; delivery failure only flags
        // the row.
        if let Err(err) = self
            .notifier
            .deliver(assignment.id, &stored.code, method, assignment.patient_id)
            .await
        {
            tracing::warn!(
                assignment_id = %assignment.id,
                otp_id = %stored.id,
                error = %err,
                "consent code delivery failed"
            );
            if let Err(err) = self.store.mark_delivery_failed(stored.id).await {
                tracing::error!(otp_id = %stored.id, error = %err, "could not flag failed delivery");
            }
        }

        Ok(OtpIssueResponse {
            otp_exists: true,
            expires_at: stored.expires_at,
            attempts_remaining: stored.max_attempts,
            delivery_method: method,
            code: self.config.expose_code_in_response.then(|| stored.code),
        })
    }

    // ==================== Verification ====================

    /// Verifies a consent code.
    ///
    /// On a match, the OTP and the assignment are updated in one atomic
    /// commit; verification after success is idempotent and returns
    /// [`ConsentError::AlreadyGranted`] without mutating anything. On a
    /// mismatch the attempt counter moves, blocking the code at the cap.
    pub async fn verify_otp(
        &self,
        caller: Caller,
        request: VerifyOtpRequest,
    ) -> ConsentResult<VerifyOtpResponse> {
        validate_code_format(&request.code)
            .map_err(|err| ConsentError::validation(err.to_string()))?;
        if caller.role == CallerRole::Administrator {
            return Err(ConsentError::forbidden(
                "administrators cannot verify consent codes",
            ));
        }

        let assignment = self
            .resolve_target(caller, request.assignment_id, request.patient_id)
            .await?;
        let now = self.clock.now();

        if !assignment.is_active {
            return Err(ConsentError::conflict("assignment is not active"));
        }
        match assignment.consent_status {
            ConsentStatus::Granted => return Err(ConsentError::AlreadyGranted),
            ConsentStatus::Denied => return Err(ConsentError::AlreadyDenied),
            _ => {}
        }

        let otp = self
            .store
            .find_latest_otp(assignment.id)
            .await?
            .ok_or_else(|| ConsentError::not_found("ConsentOtp", assignment.id))?;
        if otp.is_verified {
            return Err(ConsentError::AlreadyGranted);
        }
        if otp.is_blocked {
            return Err(ConsentError::OtpBlocked);
        }
        if otp.is_expired(now) {
            // lazy expiry: reflect the lapsed ceremony on the assignment
            self.store.mark_assignment_expired(assignment.id).await?;
            self.record(caller.id, "otp.verify", assignment.id, AuditOutcome::Failure)
                .await;
            return Err(ConsentError::OtpExpired);
        }

        if otp.code != request.code {
            let outcome = match self.store.record_failed_attempt(otp.id).await {
                Ok(outcome) => outcome,
                // the row was resolved between our read and the increment
                Err(StorageError::VersionConflict { .. }) => {
                    return Err(self.resolved_state_error(otp.id).await);
                }
                Err(err) => return Err(err.into()),
            };
            self.record(caller.id, "otp.verify", assignment.id, AuditOutcome::Failure)
                .await;
            if outcome.blocked {
                tracing::warn!(
                    assignment_id = %assignment.id,
                    otp_id = %otp.id,
                    attempts = outcome.attempts,
                    "consent code blocked after repeated failures"
                );
                return Err(ConsentError::OtpBlocked);
            }
            return Err(ConsentError::IncorrectCode {
                attempts_remaining: outcome.attempts_remaining,
            });
        }

        let consent_valid_until = now + self.config.consent_validity();
        let (granted, verified) = match self
            .store
            .commit_verification(
                assignment.id,
                otp.id,
                request.verified_by,
                now,
                consent_valid_until,
            )
            .await
        {
            Ok(pair) => pair,
            // lost the CAS: someone else resolved the code first
            Err(StorageError::VersionConflict { .. }) => {
                return Err(self.resolved_state_error(otp.id).await);
            }
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(
            assignment_id = %granted.id,
            otp_id = %verified.id,
            verified_by = %request.verified_by,
            "consent granted"
        );
        self.record(caller.id, "otp.verify", granted.id, AuditOutcome::Success)
            .await;

        Ok(VerifyOtpResponse {
            consent_status: granted.consent_status,
            access_granted: granted.access_granted,
            verified_at: verified.verified_at.unwrap_or(now),
        })
    }

    /// Maps a lost write race to the error describing how the OTP was
    /// actually resolved.
    async fn resolved_state_error(&self, otp_id: Uuid) -> ConsentError {
        match self.store.get_otp(otp_id).await {
            Ok(Some(otp)) if otp.is_verified => ConsentError::AlreadyGranted,
            Ok(_) => ConsentError::OtpBlocked,
            Err(err) => err.into(),
        }
    }

    // ==================== Reads, revocation, sweep ====================

    /// Reads an assignment together with its most recent OTP.
    ///
    /// Patients see their own assignments, providers the ones they are a
    /// party to, administrators everything. A pending assignment whose
    /// window lapsed is reflected as expired.
    pub async fn status(
        &self,
        caller: Caller,
        assignment_id: Uuid,
    ) -> ConsentResult<ConsentStatusView> {
        let mut assignment = self.load_assignment(assignment_id).await?;
        self.ensure_party(caller, &assignment, true)?;

        let now = self.clock.now();
        if assignment.consent_status == ConsentStatus::Pending && assignment.is_expired(now) {
            self.store.mark_assignment_expired(assignment.id).await?;
            assignment.consent_status = ConsentStatus::Expired;
            assignment.access_granted = false;
        }

        let latest_otp = self.store.find_latest_otp(assignment.id).await?;
        Ok(ConsentStatusView::new(&assignment, latest_otp.as_ref()))
    }

    /// Revokes an assignment. Deactivation voids access immediately,
    /// whatever the consent status.
    pub async fn revoke_assignment(
        &self,
        caller: Caller,
        assignment_id: Uuid,
    ) -> ConsentResult<()> {
        let assignment = self.load_assignment(assignment_id).await?;
        let may_revoke = match caller.role {
            CallerRole::Administrator => true,
            CallerRole::Patient => caller.id == assignment.patient_id,
            CallerRole::Provider => caller.id == assignment.primary_provider_id,
        };
        if !may_revoke {
            self.record(caller.id, "assignment.revoke", assignment_id, AuditOutcome::Denied)
                .await;
            return Err(ConsentError::forbidden(
                "only the patient, the primary provider or an administrator may revoke",
            ));
        }

        self.store.deactivate_assignment(assignment_id).await?;
        tracing::debug!(assignment_id = %assignment_id, "assignment revoked");
        self.record(caller.id, "assignment.revoke", assignment_id, AuditOutcome::Success)
            .await;
        Ok(())
    }

    /// Returns whether `provider_id` currently holds `capability` over
    /// `patient_id`'s record, per the capability matrix.
    pub async fn check_access(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
        capability: Capability,
    ) -> ConsentResult<bool> {
        Ok(self
            .provider_capabilities(provider_id, patient_id)
            .await?
            .contains(capability))
    }

    /// The union of capabilities `provider_id` holds over `patient_id`'s
    /// record across their active assignments.
    pub async fn provider_capabilities(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
    ) -> ConsentResult<CapabilitySet> {
        let now = self.clock.now();
        let assignments = self
            .store
            .find_active_for_patient(patient_id, provider_id)
            .await?;
        Ok(assignments
            .iter()
            .map(|a| a.capabilities(now))
            .fold(CapabilitySet::NONE, CapabilitySet::union))
    }

    /// Marks stale pending assignments as expired. Idempotent and safe to
    /// run repeatedly or concurrently; returns how many were marked.
    pub async fn sweep_expired(&self) -> ConsentResult<usize> {
        let now = self.clock.now();
        let stale = self.store.find_stale_pending(now).await?;
        let mut marked = 0;
        for assignment in stale {
            self.store.mark_assignment_expired(assignment.id).await?;
            marked += 1;
        }
        if marked > 0 {
            tracing::debug!(marked, "expired stale pending assignments");
        }
        Ok(marked)
    }

    // ==================== Internal helpers ====================

    async fn load_assignment(&self, id: Uuid) -> ConsentResult<Assignment> {
        self.store
            .get_assignment(id)
            .await?
            .ok_or_else(|| ConsentError::not_found("Assignment", id))
    }

    /// Resolves the assignment an OTP operation targets: explicit id, or
    /// the caller's most recent pending assignment for the patient.
    async fn resolve_target(
        &self,
        caller: Caller,
        assignment_id: Option<Uuid>,
        patient_id: Option<Uuid>,
    ) -> ConsentResult<Assignment> {
        if let Some(id) = assignment_id {
            let assignment = self.load_assignment(id).await?;
            self.ensure_party(caller, &assignment, false)?;
            return Ok(assignment);
        }

        let (patient, provider) = match caller.role {
            CallerRole::Provider => {
                let patient = patient_id.ok_or_else(|| {
                    ConsentError::validation("patientId is required when assignmentId is absent")
                })?;
                (patient, caller.id)
            }
            _ => {
                return Err(ConsentError::validation(
                    "assignmentId is required for this caller",
                ));
            }
        };
        self.store
            .find_latest_pending(patient, provider)
            .await?
            .ok_or_else(|| ConsentError::not_found("Assignment", patient))
    }

    /// Ownership check: the patient themself, a provider party to the
    /// assignment, or (when `allow_admin`) an administrator.
    fn ensure_party(
        &self,
        caller: Caller,
        assignment: &Assignment,
        allow_admin: bool,
    ) -> ConsentResult<()> {
        let permitted = match caller.role {
            CallerRole::Patient => caller.id == assignment.patient_id,
            CallerRole::Provider => assignment.involves_provider(caller.id),
            CallerRole::Administrator => allow_admin,
        };
        if permitted {
            Ok(())
        } else {
            Err(ConsentError::forbidden(
                "caller is not a party to this assignment",
            ))
        }
    }

    /// Issuance preconditions: active assignment, consent required, and
    /// the ceremony not already closed.
    async fn ensure_ceremony_open(
        &self,
        assignment: &Assignment,
        now: OffsetDateTime,
    ) -> ConsentResult<()> {
        if !assignment.is_active {
            return Err(ConsentError::conflict("assignment is not active"));
        }
        if !assignment.requires_consent {
            return Err(ConsentError::AlreadyGranted);
        }
        match assignment.consent_status {
            ConsentStatus::Granted => return Err(ConsentError::AlreadyGranted),
            ConsentStatus::Denied => return Err(ConsentError::AlreadyDenied),
            ConsentStatus::Expired => {
                return Err(ConsentError::conflict(
                    "consent window has expired; create a new assignment",
                ));
            }
            _ => {}
        }
        if assignment.is_expired(now) {
            self.store.mark_assignment_expired(assignment.id).await?;
            return Err(ConsentError::conflict(
                "consent window has expired; create a new assignment",
            ));
        }
        Ok(())
    }

    async fn record(&self, actor: Uuid, action: &str, resource_id: Uuid, outcome: AuditOutcome) {
        self.audit
            .audit(AuditEvent {
                actor,
                action: action.to_string(),
                resource_id,
                outcome,
                at: self.clock.now(),
            })
            .await;
    }
}

/// Generates a uniform six-digit numeric code, zero-padded.
fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..256 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
            assert!(validate_code_format(&code).is_ok());
        }
    }
}
