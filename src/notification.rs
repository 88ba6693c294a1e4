//! User-facing alerts derived from connection lifecycle and domain events.
//!
//! [`describe`] is a pure mapping from a [`ServerEvent`] to an optional
//! [`Notification`]. [`NotificationDispatcher`] delivers the results on a
//! bounded channel without ever blocking the connection driver.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{ChangeKind, EntityChange, ServerEvent, VerificationStatus};

/// How prominently a notification should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Urgent,
}

/// An ephemeral alert for the UI. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    /// How long the alert should stay visible.
    pub duration: Duration,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            severity,
            message: message.into(),
            duration,
        }
    }

    pub(crate) fn connected() -> Self {
        Self::new(
            Severity::Success,
            "Connected to real-time updates",
            Duration::from_millis(2000),
        )
    }

    pub(crate) fn retrying(attempt: u32, max: u32) -> Self {
        Self::new(
            Severity::Warning,
            format!("Connection lost. Retrying... ({attempt}/{max})"),
            Duration::from_millis(3000),
        )
    }

    pub(crate) fn gave_up() -> Self {
        Self::new(
            Severity::Urgent,
            "Unable to connect to real-time updates. You can still use the app but won't receive live notifications.",
            Duration::from_millis(5000),
        )
    }
}

/// Map an inbound event to a notification. Events without a user-facing
/// meaning, including every unknown event, yield `None`.
pub fn describe(event: &ServerEvent) -> Option<Notification> {
    match event {
        ServerEvent::DisasterUpdated(change) => Some(describe_disaster(change)),
        ServerEvent::ResourcesUpdated(change) => Some(describe_resource(change)),
        ServerEvent::SocialMediaUpdated(batch) => {
            let urgent = batch.urgent_count();
            if urgent > 0 {
                Some(Notification::new(
                    Severity::Urgent,
                    format!("{urgent} urgent social media alerts detected!"),
                    Duration::from_millis(8000),
                ))
            } else if !batch.posts.is_empty() {
                Some(Notification::new(
                    Severity::Info,
                    format!("{} new social media posts detected", batch.posts.len()),
                    Duration::from_millis(3000),
                ))
            } else {
                None
            }
        }
        ServerEvent::ReportVerified(outcome) => match outcome.status {
            VerificationStatus::Verified => Some(Notification::new(
                Severity::Success,
                "Report has been verified",
                Duration::from_millis(4000),
            )),
            VerificationStatus::Flagged => Some(Notification::new(
                Severity::Warning,
                "Report has been flagged for review",
                Duration::from_millis(4000),
            )),
            _ => None,
        },
        ServerEvent::UrgentNotification(notice) => Some(Notification::new(
            Severity::Urgent,
            format!("URGENT: {}", notice.message),
            Duration::from_millis(10_000),
        )),
        ServerEvent::Connected(_) | ServerEvent::UserCount(_) | ServerEvent::Unknown { .. } => {
            None
        }
    }
}

fn describe_disaster(change: &EntityChange) -> Notification {
    match change.change {
        // A new disaster is an emergency in its own right.
        ChangeKind::Create => Notification::new(
            Severity::Urgent,
            format!(
                "New disaster reported: {}",
                change.text_field("title").unwrap_or("Unknown")
            ),
            Duration::from_millis(6000),
        ),
        ChangeKind::Update => success("Disaster information updated"),
        ChangeKind::Delete => success("Disaster removed"),
        ChangeKind::Other(_) => success("Disaster updated"),
    }
}

fn describe_resource(change: &EntityChange) -> Notification {
    let action = match change.change {
        ChangeKind::Create => "New resource added",
        ChangeKind::Update => "Resource information updated",
        ChangeKind::Delete => "Resource removed",
        ChangeKind::Other(_) => "Resources updated",
    };
    let name = change.text_field("name").unwrap_or("Unknown resource");
    success(format!("{action}: {name}"))
}

fn success(message: impl Into<String>) -> Notification {
    Notification::new(Severity::Success, message, Duration::from_millis(4000))
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Pushes notifications to the consumer's bounded channel.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    /// Create a dispatcher and the receiver the UI reads from.
    /// A capacity of zero is clamped to one.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Describe `event` and publish the result, if any.
    pub fn dispatch(&self, event: &ServerEvent) {
        if let Some(notification) = describe(event) {
            self.publish(notification);
        }
    }

    /// Publish a notification. If the channel is full the notification is
    /// dropped with a warning so the caller never blocks.
    pub fn publish(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    severity = ?dropped.severity,
                    "notification channel full, dropping: {}",
                    dropped.message
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("notification channel closed, receiver dropped");
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use serde_json::{json, Value};

    fn event(name: &str, data: Value) -> ServerEvent {
        ServerEvent::from_frame(Frame::new(name, data))
    }

    #[test]
    fn disaster_create_is_urgent_and_names_title() {
        let n = describe(&event(
            "disaster_updated",
            json!({"type": "create", "data": {"title": "Flood A"}}),
        ))
        .unwrap();
        assert_eq!(n.severity, Severity::Urgent);
        assert!(n.message.contains("Flood A"));
        assert_eq!(n.duration, Duration::from_millis(6000));
    }

    #[test]
    fn disaster_create_without_title_uses_placeholder() {
        let n = describe(&event("disaster_updated", json!({"type": "create"}))).unwrap();
        assert_eq!(n.message, "New disaster reported: Unknown");
    }

    #[test]
    fn disaster_update_and_delete_are_success() {
        let update = describe(&event("disaster_updated", json!({"type": "update"}))).unwrap();
        let delete = describe(&event("disaster_updated", json!({"type": "delete"}))).unwrap();
        assert_eq!(update.severity, Severity::Success);
        assert_eq!(update.message, "Disaster information updated");
        assert_eq!(delete.message, "Disaster removed");
    }

    #[test]
    fn urgent_batch_yields_single_aggregate() {
        let n = describe(&event(
            "social_media_updated",
            json!({"posts": [
                {"priority": "urgent"},
                {"priority": "low"},
                {"priority": "high"}
            ]}),
        ))
        .unwrap();
        assert_eq!(n.severity, Severity::Urgent);
        assert_eq!(n.message, "1 urgent social media alerts detected!");
    }

    #[test]
    fn calm_batch_is_informational_and_empty_batch_is_silent() {
        let n = describe(&event(
            "social_media_updated",
            json!({"posts": [{"priority": "low"}, {}]}),
        ))
        .unwrap();
        assert_eq!(n.severity, Severity::Info);
        assert_eq!(n.message, "2 new social media posts detected");

        assert_eq!(
            describe(&event("social_media_updated", json!({"posts": []}))),
            None
        );
    }

    #[test]
    fn resource_change_names_resource() {
        let n = describe(&event(
            "resources_updated",
            json!({"type": "create", "data": {"name": "Shelter 4"}}),
        ))
        .unwrap();
        assert_eq!(n.message, "New resource added: Shelter 4");
    }

    #[test]
    fn verification_outcomes() {
        let verified = describe(&event("report_verified", json!({"status": "verified"}))).unwrap();
        let flagged = describe(&event("report_verified", json!({"status": "flagged"}))).unwrap();
        assert_eq!(verified.severity, Severity::Success);
        assert_eq!(flagged.severity, Severity::Warning);
        assert_eq!(
            describe(&event("report_verified", json!({"status": "pending"}))),
            None
        );
    }

    #[test]
    fn urgent_broadcast_is_prefixed() {
        let n = describe(&event(
            "urgent_notification",
            json!({"message": "Evacuate zone 3"}),
        ))
        .unwrap();
        assert_eq!(n.severity, Severity::Urgent);
        assert_eq!(n.message, "URGENT: Evacuate zone 3");
    }

    #[test]
    fn unknown_and_presence_events_are_silent() {
        assert_eq!(describe(&event("shelter_opened", json!({}))), None);
        assert_eq!(describe(&event("user_count", json!(3))), None);
        assert_eq!(describe(&event("connected", json!({"id": "abc"}))), None);
    }

    #[test]
    fn retry_message_includes_attempt_and_ceiling() {
        let n = Notification::retrying(2, 5);
        assert_eq!(n.severity, Severity::Warning);
        assert!(n.message.contains("(2/5)"));
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (dispatcher, mut rx) = NotificationDispatcher::channel(1);
        dispatcher.publish(Notification::connected());
        dispatcher.publish(Notification::gave_up());

        assert_eq!(rx.recv().await.unwrap(), Notification::connected());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_after_receiver_dropped_is_silent() {
        let (dispatcher, rx) = NotificationDispatcher::channel(4);
        drop(rx);
        dispatcher.dispatch(&event("urgent_notification", json!({"message": "x"})));
    }
}
