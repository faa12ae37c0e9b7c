//! Notification delivery seam
//!
//! The engine never waits on delivery for correctness. Assignment
//! notifications are spawned; reminders and escalations wait in the run's
//! outbox until a sweep delivers them.

use async_trait::async_trait;
use flowline_types::Notification;

/// Delivery failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Hands notifications to whatever delivers them
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            run_id = %notification.run_id,
            step_id = %notification.step_id,
            recipient = %notification.recipient,
            kind = %notification.kind,
            "Notification"
        );
        Ok(())
    }
}
