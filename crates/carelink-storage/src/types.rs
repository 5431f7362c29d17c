//! Shared types for the consent storage traits.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Outcome of atomically recording a failed verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAttempt {
    /// The attempt count after the increment.
    pub attempts: u32,
    /// Whether the increment reached the cap and blocked the code.
    pub blocked: bool,
    /// Attempts left before the code blocks (0 when `blocked`).
    pub attempts_remaining: u32,
}

/// OTP generation activity inside a rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationWindow {
    /// Rows created in the window, resolved or not.
    pub count: u32,
    /// Creation time of the oldest row in the window, if any. Used to
    /// estimate when the window frees up.
    pub oldest_created_at: Option<OffsetDateTime>,
}

impl GenerationWindow {
    /// An empty window.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            count: 0,
            oldest_created_at: None,
        }
    }
}
