//! Notifications the engine hands to the delivery collaborator

use crate::{RunId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why someone is being notified
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A step was assigned to the recipient
    Assignment,
    /// A step is about to come due
    Reminder,
    /// A step stayed overdue past the escalation threshold
    Escalation,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationKind::Assignment => "ASSIGNMENT",
            NotificationKind::Reminder => "REMINDER",
            NotificationKind::Escalation => "ESCALATION",
        };
        write!(f, "{}", s)
    }
}

/// A notification for one recipient about one step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub run_id: RunId,
    pub step_id: StepId,
    pub recipient: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(
        run_id: RunId,
        step_id: StepId,
        recipient: impl Into<String>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            run_id,
            step_id,
            recipient: recipient.into(),
            kind,
        }
    }
}

/// An outbox entry awaiting delivery
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub id: String,
    pub notification: Notification,
    /// Failed delivery attempts so far
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl PendingNotification {
    pub fn new(notification: Notification, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification,
            attempts: 0,
            created_at: now,
        }
    }
}
