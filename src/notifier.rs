//! User-facing notification channel.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Fire-and-forget sink for user notifications (toasts, alerts).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Default notifier that emits notifications as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let Notification { id, title, description, .. } = &notification;
        match notification.severity {
            Severity::Success => tracing::info!(%id, %title, %description, "notification"),
            Severity::Warning => tracing::warn!(%id, %title, %description, "notification"),
            Severity::Error => tracing::error!(%id, %title, %description, "notification"),
        }
    }
}
