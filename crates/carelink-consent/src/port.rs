//! External collaborator ports.
//!
//! The ceremony manager does not deliver messages, resolve organizational
//! affiliation or write compliance logs itself; it talks to these traits.
//! Implementations live with the delivery/directory/compliance systems and
//! are injected at construction time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use carelink_core::ConsentMethod;

/// Errors reported by a notification adapter.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Recipient not found")]
    RecipientNotFound,

    #[error("Channel disabled: {0}")]
    ChannelDisabled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for notification operations.
pub type NotificationResult<T> = std::result::Result<T, NotificationError>;

/// Receipt returned by a successful delivery handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    /// Adapter-specific message id, when the channel provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// When the handoff was accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub accepted_at: OffsetDateTime,
}

/// Out-of-band delivery of consent codes.
///
/// Delivery is fire-and-forget from the ceremony's perspective: the OTP row
/// commits before delivery is attempted and a failure only flags the row,
/// it never rolls the code back. The `recipient` is the patient's id; the
/// adapter owns resolving it to an address for the chosen channel.
#[async_trait]
pub trait ConsentNotifier: Send + Sync {
    /// Hands a plaintext code to the delivery channel.
    ///
    /// # Errors
    ///
    /// Returns an error when the channel refuses the handoff. The caller
    /// records the failure on the OTP row and moves on.
    async fn deliver(
        &self,
        assignment_id: Uuid,
        code: &str,
        method: ConsentMethod,
        recipient: Uuid,
    ) -> NotificationResult<DeliveryReceipt>;
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failure,
}

/// A compliance log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Who acted.
    pub actor: Uuid,
    /// What they did ("assignment.create", "otp.verify", ...).
    pub action: String,
    /// The assignment or OTP acted on.
    pub resource_id: Uuid,
    /// How it went.
    pub outcome: AuditOutcome,
    /// When it happened.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Compliance logging sink.
///
/// Audit writes never fail the operation they describe; sinks swallow and
/// report their own errors.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records an event.
    async fn audit(&self, event: AuditEvent);
}

/// Directory lookup for a provider's organizational affiliation.
///
/// Backed by the platform's provider registry, which is outside this
/// subsystem. `None` means the affiliation is unknown, which the access
/// policy treats as cross-organization.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Returns the organization id the provider belongs to, if known.
    async fn organization_of(&self, provider_id: Uuid) -> Option<String>;
}

/// An [`AuditSink`] that writes events to the `tracing` log stream.
///
/// The default sink for deployments without a dedicated compliance store.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn audit(&self, event: AuditEvent) {
        tracing::info!(
            actor = %event.actor,
            action = %event.action,
            resource_id = %event.resource_id,
            outcome = ?event.outcome,
            at = %event.at,
            "consent audit event"
        );
    }
}
