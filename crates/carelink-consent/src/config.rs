//! Consent ceremony configuration.
//!
//! One canonical OTP TTL (15 minutes) governs every code; the separate
//! `consent_duration_months` governs how long a *granted* consent remains
//! valid. All values are configurable but validated against zero and
//! out-of-range settings.
//!
//! # Example (TOML)
//!
//! ```toml
//! [consent]
//! otp_ttl = "15m"
//! rate_limit_window = "30m"
//! rate_limit_max_generations = 3
//! consent_duration_months = 6
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the consent ceremony manager.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// How long a generated OTP code is accepted.
    /// Default: 15 minutes.
    #[serde(with = "humantime_serde")]
    pub otp_ttl: Duration,

    /// Failed verification attempts after which a code blocks itself.
    /// Default: 3.
    pub max_verification_attempts: u32,

    /// Trailing window bounding OTP (re)generation per assignment.
    /// Default: 30 minutes.
    #[serde(with = "humantime_serde")]
    pub rate_limit_window: Duration,

    /// Generations allowed inside the window before `RateLimited`.
    /// Default: 3.
    pub rate_limit_max_generations: u32,

    /// How long a granted consent remains valid, in months.
    /// Default: 6.
    pub consent_duration_months: u32,

    /// Default assignment lifetime when the creator does not choose one.
    /// Default: 90 days. Creators may pick 1-365.
    pub default_assignment_expiry_days: u16,

    /// Echo the plaintext code in OTP responses. Never enable outside
    /// development and test environments.
    pub expose_code_in_response: bool,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            otp_ttl: Duration::from_secs(15 * 60),
            max_verification_attempts: 3,
            rate_limit_window: Duration::from_secs(30 * 60),
            rate_limit_max_generations: 3,
            consent_duration_months: 6,
            default_assignment_expiry_days: 90,
            expose_code_in_response: false,
        }
    }
}

impl ConsentConfig {
    /// Creates a configuration with a custom OTP TTL.
    #[must_use]
    pub fn with_otp_ttl(mut self, ttl: Duration) -> Self {
        self.otp_ttl = ttl;
        self
    }

    /// Creates a configuration with a custom rate-limit window.
    #[must_use]
    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    /// Creates a configuration with a custom generation cap.
    #[must_use]
    pub fn with_rate_limit_max_generations(mut self, max: u32) -> Self {
        self.rate_limit_max_generations = max;
        self
    }

    /// Creates a configuration that echoes plaintext codes in responses.
    /// For development and tests only.
    #[must_use]
    pub fn with_exposed_codes(mut self) -> Self {
        self.expose_code_in_response = true;
        self
    }

    /// How long a granted consent stays valid. Months are counted as 30
    /// days for scheduling purposes.
    #[must_use]
    pub fn consent_validity(&self) -> time::Duration {
        time::Duration::days(i64::from(self.consent_duration_months) * 30)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting found.
    pub fn validate(&self) -> Result<(), String> {
        if self.otp_ttl.is_zero() {
            return Err("otp_ttl must be non-zero".to_string());
        }
        if self.max_verification_attempts == 0 {
            return Err("max_verification_attempts must be at least 1".to_string());
        }
        if self.rate_limit_window.is_zero() {
            return Err("rate_limit_window must be non-zero".to_string());
        }
        if self.rate_limit_max_generations == 0 {
            return Err("rate_limit_max_generations must be at least 1".to_string());
        }
        if self.consent_duration_months == 0 {
            return Err("consent_duration_months must be at least 1".to_string());
        }
        if !(1..=365).contains(&self.default_assignment_expiry_days) {
            return Err("default_assignment_expiry_days must be within 1-365".to_string());
        }
        Ok(())
    }
}
