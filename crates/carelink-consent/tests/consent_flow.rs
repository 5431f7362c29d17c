//! End-to-end ceremony tests against the in-memory backend with a manually
//! driven clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use time::Duration;
use time::macros::datetime;
use uuid::Uuid;

use carelink_consent::{
    AuditEvent, AuditSink, Caller, ConsentConfig, ConsentError, ConsentNotifier, ConsentService,
    CreateAssignmentRequest, DeliveryReceipt, NotificationError, NotificationResult,
    ProviderDirectory, RequestOtpRequest, ResendOtpRequest, VerifyOtpRequest,
};
use carelink_core::{
    Capability, Clock, ConsentMethod, ConsentStatus, FixedClock, VerifierParty,
};
use carelink_db_memory::InMemoryConsentStore;

#[derive(Default)]
struct RecordingNotifier {
    deliveries: Mutex<Vec<(Uuid, String, ConsentMethod)>>,
    fail_next: AtomicBool,
}

#[async_trait]
impl ConsentNotifier for RecordingNotifier {
    async fn deliver(
        &self,
        assignment_id: Uuid,
        code: &str,
        method: ConsentMethod,
        _recipient: Uuid,
    ) -> NotificationResult<DeliveryReceipt> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(NotificationError::SendFailed("smtp down".to_string()));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((assignment_id, code.to_string(), method));
        Ok(DeliveryReceipt {
            message_id: Some("msg-1".to_string()),
            accepted_at: time::OffsetDateTime::now_utc(),
        })
    }
}

#[derive(Default)]
struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn audit(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct StaticDirectory {
    orgs: HashMap<Uuid, String>,
}

#[async_trait]
impl ProviderDirectory for StaticDirectory {
    async fn organization_of(&self, provider_id: Uuid) -> Option<String> {
        self.orgs.get(&provider_id).cloned()
    }
}

struct Harness {
    service: ConsentService,
    clock: Arc<FixedClock>,
    notifier: Arc<RecordingNotifier>,
    audit: Arc<RecordingAudit>,
    patient: Uuid,
    primary: Uuid,
    same_org_doctor: Uuid,
    cross_org_doctor: Uuid,
}

fn harness() -> Harness {
    let patient = Uuid::new_v4();
    let primary = Uuid::new_v4();
    let same_org_doctor = Uuid::new_v4();
    let cross_org_doctor = Uuid::new_v4();

    let mut orgs = HashMap::new();
    orgs.insert(primary, "mercy-general".to_string());
    orgs.insert(same_org_doctor, "mercy-general".to_string());
    orgs.insert(cross_org_doctor, "lakeside-clinic".to_string());

    let clock = Arc::new(FixedClock::new(datetime!(2025-06-01 12:00 UTC)));
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(RecordingAudit::default());
    let service = ConsentService::new(
        Arc::new(InMemoryConsentStore::new()),
        notifier.clone(),
        audit.clone(),
        Arc::new(StaticDirectory { orgs }),
        clock.clone(),
        ConsentConfig::default().with_exposed_codes(),
    )
    .unwrap();

    Harness {
        service,
        clock,
        notifier,
        audit,
        patient,
        primary,
        same_org_doctor,
        cross_org_doctor,
    }
}

fn create_request(h: &Harness, doctor: Uuid) -> CreateAssignmentRequest {
    CreateAssignmentRequest {
        patient_id: h.patient,
        secondary_doctor_id: Some(doctor),
        secondary_hsp_id: None,
        assignment_type: None,
        assignment_reason: "cardiology referral for follow-up".to_string(),
        specialty_focus: vec!["cardiology".to_string()],
        care_plan_ids: Vec::new(),
        requires_consent: None,
        expires_in_days: None,
    }
}

async fn pending_assignment(h: &Harness) -> Uuid {
    let response = h
        .service
        .create_assignment(Caller::provider(h.primary), create_request(h, h.cross_org_doctor))
        .await
        .unwrap();
    assert_eq!(response.consent_status, ConsentStatus::Pending);
    response.assignment_id
}

async fn issued_code(h: &Harness, assignment_id: Uuid) -> String {
    h.service
        .request_otp(
            Caller::provider(h.primary),
            RequestOtpRequest {
                assignment_id: Some(assignment_id),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .code
        .expect("codes exposed in test config")
}

fn verify(assignment_id: Uuid, code: &str) -> VerifyOtpRequest {
    VerifyOtpRequest {
        assignment_id: Some(assignment_id),
        patient_id: None,
        code: code.to_string(),
        verified_by: VerifierParty::Patient,
    }
}

// Scenario A: same organization, access granted at creation, no OTP rows.
#[tokio::test]
async fn same_organization_grants_without_ceremony() {
    let h = harness();
    let response = h
        .service
        .create_assignment(Caller::provider(h.primary), create_request(&h, h.same_org_doctor))
        .await
        .unwrap();

    assert!(response.same_organization);
    assert!(!response.requires_consent);
    assert_eq!(response.consent_status, ConsentStatus::Granted);
    assert!(response.access_granted);
    assert!(h.notifier.deliveries.lock().unwrap().is_empty());

    // the ceremony never opens for a granted assignment
    let err = h
        .service
        .request_otp(
            Caller::provider(h.primary),
            RequestOtpRequest {
                assignment_id: Some(response.assignment_id),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::AlreadyGranted));

    let status = h
        .service
        .status(Caller::patient(h.patient), response.assignment_id)
        .await
        .unwrap();
    assert!(status.latest_otp.is_none());
}

// Scenario B: cross organization, full ceremony through to the grant.
#[tokio::test]
async fn cross_organization_runs_full_ceremony() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;

    let issued = h
        .service
        .request_otp(
            Caller::provider(h.primary),
            RequestOtpRequest {
                assignment_id: Some(assignment_id),
                consent_method: Some(ConsentMethod::EmailOtp),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(issued.otp_exists);
    assert_eq!(issued.attempts_remaining, 3);
    assert_eq!(issued.expires_at, h.clock.now() + Duration::minutes(15));

    let code = issued.code.unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.bytes().all(|b| b.is_ascii_digit()));

    // the code went out through the delivery port
    let deliveries = h.notifier.deliveries.lock().unwrap().clone();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].1, code);
    assert_eq!(deliveries[0].2, ConsentMethod::EmailOtp);

    let granted = h
        .service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap();
    assert_eq!(granted.consent_status, ConsentStatus::Granted);
    assert!(granted.access_granted);
    assert_eq!(granted.verified_at, h.clock.now());

    // consent stays valid for the configured duration, not the OTP TTL
    let status = h
        .service
        .status(Caller::patient(h.patient), assignment_id)
        .await
        .unwrap();
    assert_eq!(
        status.expires_at,
        Some(h.clock.now() + Duration::days(180))
    );
}

#[tokio::test]
async fn verify_is_idempotent_past_success() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;
    let code = issued_code(&h, assignment_id).await;

    h.service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap();

    let err = h
        .service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::AlreadyGranted));
}

// Scenario C: three wrong codes block the OTP; a resend starts fresh.
#[tokio::test]
async fn three_failures_block_then_resend_recovers() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;
    let code = issued_code(&h, assignment_id).await;
    let wrong = if code == "000000" { "000001" } else { "000000" };

    let first = h
        .service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, wrong))
        .await
        .unwrap_err();
    assert!(matches!(
        first,
        ConsentError::IncorrectCode { attempts_remaining: 2 }
    ));

    let second = h
        .service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, wrong))
        .await
        .unwrap_err();
    assert!(matches!(
        second,
        ConsentError::IncorrectCode { attempts_remaining: 1 }
    ));

    let third = h
        .service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, wrong))
        .await
        .unwrap_err();
    assert!(matches!(third, ConsentError::OtpBlocked));

    // even the correct code is refused once blocked
    let err = h
        .service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::OtpBlocked));

    // a resend under the rate limit issues a fresh, unblocked code
    let reissued = h
        .service
        .resend_otp(
            Caller::provider(h.primary),
            ResendOtpRequest {
                assignment_id: Some(assignment_id),
                patient_id: None,
                consent_method: None,
                reason: "patient never received the email".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(reissued.attempts_remaining, 3);

    let status = h
        .service
        .status(Caller::patient(h.patient), assignment_id)
        .await
        .unwrap();
    let latest = status.latest_otp.unwrap();
    assert!(!latest.is_blocked);
    assert_eq!(latest.attempts_remaining, 3);

    let fresh = reissued.code.unwrap();
    let granted = h
        .service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &fresh))
        .await
        .unwrap();
    assert!(granted.access_granted);
}

// Scenario D: expiry is evaluated lazily at verify time.
#[tokio::test]
async fn expired_code_fails_and_marks_assignment() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;
    let code = issued_code(&h, assignment_id).await;

    h.clock.advance(Duration::minutes(16));

    let err = h
        .service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::OtpExpired));

    let status = h
        .service
        .status(Caller::patient(h.patient), assignment_id)
        .await
        .unwrap();
    assert_eq!(status.consent_status, ConsentStatus::Expired);
    assert!(!status.access_granted);
}

// Scenario E: the fourth generation in the window is rate limited.
#[tokio::test]
async fn fourth_generation_in_window_is_rate_limited() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;

    for _ in 0..2 {
        issued_code(&h, assignment_id).await;
        h.clock.advance(Duration::minutes(5));
    }
    h.service
        .resend_otp(
            Caller::provider(h.primary),
            ResendOtpRequest {
                assignment_id: Some(assignment_id),
                patient_id: None,
                consent_method: None,
                reason: "wrong address on file".to_string(),
            },
        )
        .await
        .unwrap();

    let err = h
        .service
        .request_otp(
            Caller::provider(h.primary),
            RequestOtpRequest {
                assignment_id: Some(assignment_id),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    let ConsentError::RateLimited { retry_after } = err else {
        panic!("expected RateLimited, got {err}");
    };
    assert!(retry_after > StdDuration::ZERO);
    assert!(retry_after <= StdDuration::from_secs(30 * 60));

    // the window slides: half an hour after the first generation a new
    // request goes through
    h.clock.advance(Duration::minutes(21));
    issued_code(&h, assignment_id).await;
}

#[tokio::test]
async fn resolves_most_recent_pending_assignment_without_id() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;

    let issued = h
        .service
        .request_otp(
            Caller::provider(h.primary),
            RequestOtpRequest {
                patient_id: Some(h.patient),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(issued.otp_exists);
    // default channel is email
    assert_eq!(issued.delivery_method, ConsentMethod::EmailOtp);

    let code = issued.code.unwrap();
    h.service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap();
}

#[tokio::test]
async fn capability_checks_follow_the_grant() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;

    assert!(
        !h.service
            .check_access(h.cross_org_doctor, h.patient, Capability::View)
            .await
            .unwrap()
    );

    let code = issued_code(&h, assignment_id).await;
    h.service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap();

    for capability in Capability::ALL {
        assert!(
            h.service
                .check_access(h.cross_org_doctor, h.patient, capability)
                .await
                .unwrap(),
            "specialist should hold {capability:?} after the grant"
        );
    }

    // revocation voids access immediately, whatever the consent status
    h.service
        .revoke_assignment(Caller::patient(h.patient), assignment_id)
        .await
        .unwrap();
    assert!(
        !h.service
            .check_access(h.cross_org_doctor, h.patient, Capability::View)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn strangers_are_forbidden() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;
    let stranger = Uuid::new_v4();

    let err = h
        .service
        .status(Caller::provider(stranger), assignment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden { .. }));

    let err = h
        .service
        .verify_otp(Caller::patient(stranger), verify(assignment_id, "123456"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden { .. }));

    // administrators may read status but never verify
    let admin = Caller::administrator(Uuid::new_v4());
    h.service.status(admin, assignment_id).await.unwrap();
    let err = h
        .service
        .verify_otp(
            admin,
            VerifyOtpRequest {
                assignment_id: Some(assignment_id),
                patient_id: None,
                code: "123456".to_string(),
                verified_by: VerifierParty::Provider,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden { .. }));
}

#[tokio::test]
async fn delivery_failure_flags_the_row_but_keeps_the_code() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;

    h.notifier.fail_next.store(true, Ordering::SeqCst);
    let issued = h
        .service
        .request_otp(
            Caller::provider(h.primary),
            RequestOtpRequest {
                assignment_id: Some(assignment_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let status = h
        .service
        .status(Caller::patient(h.patient), assignment_id)
        .await
        .unwrap();
    assert!(status.latest_otp.unwrap().delivery_failed);

    // the code itself still verifies
    let code = issued.code.unwrap();
    h.service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap();
}

#[tokio::test]
async fn sweep_marks_stale_pending_assignments() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;

    // default assignment lifetime is 90 days
    h.clock.advance(Duration::days(91));
    assert_eq!(h.service.sweep_expired().await.unwrap(), 1);
    // idempotent
    assert_eq!(h.service.sweep_expired().await.unwrap(), 0);

    let status = h
        .service
        .status(Caller::patient(h.patient), assignment_id)
        .await
        .unwrap();
    assert_eq!(status.consent_status, ConsentStatus::Expired);
}

#[tokio::test]
async fn create_validation_and_conflicts() {
    let h = harness();

    // short reason
    let mut request = create_request(&h, h.cross_org_doctor);
    request.assignment_reason = "short".to_string();
    let err = h
        .service
        .create_assignment(Caller::provider(h.primary), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Validation { .. }));

    // both secondary references
    let mut request = create_request(&h, h.cross_org_doctor);
    request.secondary_hsp_id = Some(Uuid::new_v4());
    let err = h
        .service
        .create_assignment(Caller::provider(h.primary), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Conflict { .. }));

    // out-of-range lifetime
    let mut request = create_request(&h, h.cross_org_doctor);
    request.expires_in_days = Some(400);
    let err = h
        .service
        .create_assignment(Caller::provider(h.primary), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Validation { .. }));

    // duplicate active assignment for the same pair
    h.service
        .create_assignment(Caller::provider(h.primary), create_request(&h, h.cross_org_doctor))
        .await
        .unwrap();
    let err = h
        .service
        .create_assignment(Caller::provider(h.primary), create_request(&h, h.cross_org_doctor))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Conflict { .. }));

    // patients cannot create assignments
    let err = h
        .service
        .create_assignment(Caller::patient(h.patient), create_request(&h, h.cross_org_doctor))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden { .. }));
}

#[tokio::test]
async fn consent_override_beats_the_organization_rule() {
    let h = harness();

    // waive the ceremony across organizations
    let mut request = create_request(&h, h.cross_org_doctor);
    request.requires_consent = Some(false);
    let waived = h
        .service
        .create_assignment(Caller::provider(h.primary), request)
        .await
        .unwrap();
    assert!(!waived.requires_consent);
    assert!(waived.access_granted);
    assert!(!waived.same_organization);

    // force it inside one organization
    let mut request = create_request(&h, h.same_org_doctor);
    request.requires_consent = Some(true);
    let forced = h
        .service
        .create_assignment(Caller::provider(h.primary), request)
        .await
        .unwrap();
    assert!(forced.requires_consent);
    assert_eq!(forced.consent_status, ConsentStatus::Pending);
    assert!(!forced.access_granted);
    assert!(forced.same_organization);
}

#[tokio::test]
async fn malformed_code_is_rejected_before_any_lookup() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;
    issued_code(&h, assignment_id).await;

    for bad in ["12345", "1234567", "12a456", ""] {
        let err = h
            .service
            .verify_otp(Caller::patient(h.patient), verify(assignment_id, bad))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsentError::Validation { .. }), "{bad:?}");
    }

    // a malformed code never costs an attempt
    let status = h
        .service
        .status(Caller::patient(h.patient), assignment_id)
        .await
        .unwrap();
    assert_eq!(status.latest_otp.unwrap().attempts_remaining, 3);
}

#[tokio::test]
async fn audit_trail_records_the_ceremony() {
    let h = harness();
    let assignment_id = pending_assignment(&h).await;
    let code = issued_code(&h, assignment_id).await;
    h.service
        .verify_otp(Caller::patient(h.patient), verify(assignment_id, &code))
        .await
        .unwrap();

    let events = h.audit.events.lock().unwrap();
    let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["assignment.create", "otp.request", "otp.verify"]);
    assert!(events.iter().all(|e| e.resource_id == assignment_id));
}
