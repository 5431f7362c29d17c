//! # carelink-consent
//!
//! The consent ceremony manager for the CareLink platform: decides which
//! providers may access a patient's record and mediates cross-organization
//! access through a one-time-passcode consent ceremony with rate limiting,
//! attempt blocking and time-bounded grants.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use carelink_consent::{ConsentConfig, ConsentService, Caller, CreateAssignmentRequest};
//! use carelink_core::SystemClock;
//! use carelink_db_memory::InMemoryConsentStore;
//!
//! let service = ConsentService::new(
//!     Arc::new(InMemoryConsentStore::new()),
//!     notifier,
//!     audit,
//!     directory,
//!     Arc::new(SystemClock),
//!     ConsentConfig::default(),
//! )?;
//!
//! let response = service.create_assignment(caller, request).await?;
//! ```
//!
//! # Security
//!
//! - Codes are six uniform random digits with a 15-minute TTL.
//! - Three failed verifications block a code; a blocked code never
//!   verifies, even with the right digits.
//! - Three generations per trailing 30-minute window per assignment.
//! - The grant is a single atomic commit guarded by a compare-and-swap on
//!   the OTP row; repeated success is idempotent.
//! - Plaintext codes leave the service only through the delivery port
//!   (or, in development configurations, the issue response).

mod config;
mod error;
mod port;
mod service;
mod types;

pub use config::ConsentConfig;
pub use error::{ConsentError, ConsentResult};
pub use port::{
    AuditEvent, AuditOutcome, AuditSink, ConsentNotifier, DeliveryReceipt, NotificationError,
    NotificationResult, ProviderDirectory, TracingAuditSink,
};
pub use service::ConsentService;
pub use types::{
    Caller, CallerRole, ConsentStatusView, CreateAssignmentRequest, CreateAssignmentResponse,
    OtpIssueResponse, OtpSummary, RequestOtpRequest, ResendOtpRequest, VerifyOtpRequest,
    VerifyOtpResponse,
};
