//! Injectable time source.
//!
//! Expiry windows, rate-limit windows and grant timestamps are all derived
//! from a [`Clock`] handed to the service at construction time, never from
//! ambient wall-clock reads inside handlers. Production code uses
//! [`SystemClock`]; tests use [`FixedClock`] and advance it explicitly.

use std::sync::Mutex;
use time::{Duration, OffsetDateTime};

/// A source of "now".
///
/// Object-safe so services can hold an `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    /// Returns the current instant in UTC.
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time. The production implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A manually driven clock for deterministic tests.
///
/// Starts at a given instant and only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<OffsetDateTime>,
}

impl FixedClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += delta;
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, instant: OffsetDateTime) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock lock poisoned")
    }
}
