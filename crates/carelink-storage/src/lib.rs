//! # carelink-storage
//!
//! Storage abstraction layer for the CareLink consent engine.
//!
//! This crate defines the trait and types that all storage backends must
//! implement. It does not contain any implementations - those are provided
//! by separate crates (`carelink-db-memory` for the in-memory backend).
//!
//! ## Overview
//!
//! The main trait is [`ConsentStore`], which defines the contract for:
//! - Assignment persistence and structural-conflict checks
//! - OTP issuance, attempt tracking and rate-limit window counts
//! - The atomic verification commit (OTP + assignment in one transaction)
//!
//! Invariant-sensitive writes are single trait calls so backends can make
//! each one atomic; see the trait documentation for the exact guarantees.

mod error;
mod traits;
mod types;

pub use error::{StorageError, StorageResult};
pub use traits::ConsentStore;
pub use types::{FailedAttempt, GenerationWindow};
