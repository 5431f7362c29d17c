//! # carelink-core
//!
//! Core domain types for the CareLink consent authorization engine:
//! care assignments, consent OTPs, the access policy evaluator, the
//! provider capability matrix and the injectable clock.
//!
//! Everything here is pure data and pure functions; persistence lives in
//! `carelink-storage` implementations and orchestration in
//! `carelink-consent`.

pub mod assignment;
pub mod clock;
pub mod error;
pub mod otp;
pub mod permissions;
pub mod policy;

pub use assignment::{
    Assignment, AssignmentType, ConsentStatus, SecondaryProvider, SecondaryProviderKind,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CoreError, Result};
pub use otp::{ConsentMethod, ConsentOtp, OTP_CODE_LENGTH, VerifierParty, validate_code_format};
pub use permissions::{Capability, CapabilitySet, capabilities_for};
pub use policy::{AccessDecision, evaluate_access_policy};
