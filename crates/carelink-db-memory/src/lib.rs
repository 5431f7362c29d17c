//! # carelink-db-memory
//!
//! In-memory storage backend for the CareLink consent engine.
//!
//! Implements [`carelink_storage::ConsentStore`] over lock-free papaya
//! maps, with per-assignment write serialization so the live-OTP and
//! grant-commit invariants hold under concurrent callers. Intended for
//! tests, demos and single-node deployments; durable backends live in
//! their own crates.

mod store;

pub use store::InMemoryConsentStore;
