//! Notification hook for request lifecycle events.
//!
//! Transports (desktop, webhook, mail) live outside the engine. Whatever
//! implements [`Notifier`] is called after the ledger transaction commits;
//! a failure is logged and never affects the request.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use slb_core::{RequestId, RequestStatus, RiskTier, Timestamp};

/// A lifecycle event worth telling someone about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A request needs reviewers.
    RequestCreated {
        /// Request.
        request_id: RequestId,
        /// Tier.
        tier: RiskTier,
        /// Redacted command.
        command: String,
        /// Requesting agent.
        requester_agent: String,
        /// Approvals required.
        min_approvals: u32,
    },
    /// A request passed its deadline and was escalated to a wider pool.
    RequestEscalated {
        /// Request.
        request_id: RequestId,
        /// Extended deadline.
        deadline: Timestamp,
    },
    /// A request changed state.
    StatusChanged {
        /// Request.
        request_id: RequestId,
        /// Previous state.
        from: RequestStatus,
        /// New state.
        to: RequestStatus,
    },
}

impl NotificationEvent {
    /// The request the event is about.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::RequestCreated { request_id, .. }
            | Self::RequestEscalated { request_id, .. }
            | Self::StatusChanged { request_id, .. } => *request_id,
        }
    }
}

/// A notifier failed to deliver an event.
#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers lifecycle events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event.
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log and nowhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        info!(request_id = %event.request_id(), event = ?event, "Request notification");
        Ok(())
    }
}

/// Send `event`, logging (and swallowing) any failure.
pub(crate) async fn dispatch(notifier: &dyn Notifier, event: NotificationEvent) {
    if let Err(e) = notifier.notify(&event).await {
        warn!(request_id = %event.request_id(), error = %e, "Notifier failed");
    }
}
