//! Typed inbound events.
//!
//! The server pushes named events. The names this client understands are
//! listed in [`EventKind`] and parsed into the matching [`ServerEvent`]
//! variant. Any other name is kept as [`ServerEvent::Unknown`] so that new
//! server-side events still reach handlers registered by name.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::protocol::Frame;

// ── Event kinds ─────────────────────────────────────────────────────

/// Inbound event names with a known payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Server confirmation sent right after the handshake.
    Connected,
    /// A disaster record was created, updated or deleted.
    DisasterUpdated,
    /// A resource record was created, updated or deleted.
    ResourcesUpdated,
    /// A batch of freshly collected social media posts.
    SocialMediaUpdated,
    /// A report went through verification.
    ReportVerified,
    /// Number of connected peers.
    UserCount,
    /// Free-form urgent broadcast.
    UrgentNotification,
}

impl EventKind {
    /// All known kinds.
    pub const ALL: [EventKind; 7] = [
        EventKind::Connected,
        EventKind::DisasterUpdated,
        EventKind::ResourcesUpdated,
        EventKind::SocialMediaUpdated,
        EventKind::ReportVerified,
        EventKind::UserCount,
        EventKind::UrgentNotification,
    ];

    /// Wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::DisasterUpdated => "disaster_updated",
            Self::ResourcesUpdated => "resources_updated",
            Self::SocialMediaUpdated => "social_media_updated",
            Self::ReportVerified => "report_verified",
            Self::UserCount => "user_count",
            Self::UrgentNotification => "urgent_notification",
        }
    }

    /// Look up a kind by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl AsRef<str> for EventKind {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payload enums ───────────────────────────────────────────────────

/// Lifecycle step carried in the `type` field of an entity change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Other(String),
}

impl From<String> for ChangeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Other(value),
        }
    }
}

/// Priority attached to a social media post.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
    Other(String),
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        match value.as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "urgent" => Self::Urgent,
            _ => Self::Other(value),
        }
    }
}

/// Outcome of a report verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum VerificationStatus {
    Verified,
    Flagged,
    Rejected,
    Pending,
    Other(String),
}

impl From<String> for VerificationStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "verified" => Self::Verified,
            "flagged" => Self::Flagged,
            "rejected" => Self::Rejected,
            "pending" => Self::Pending,
            _ => Self::Other(value),
        }
    }
}

// ── Payload structs ─────────────────────────────────────────────────

/// Payload of `disaster_updated` and `resources_updated`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityChange {
    #[serde(rename = "type")]
    pub change: ChangeKind,
    /// The affected record, as sent by the server.
    #[serde(default)]
    pub data: Value,
}

impl EntityChange {
    /// String field of the affected record, e.g. `title` or `name`.
    pub fn text_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Identifier of the affected record. Numeric ids are rendered as text.
    pub fn entity_id(&self) -> Option<String> {
        match self.data.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// One post inside a [`SocialMediaBatch`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SocialPost {
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SocialPost {
    pub fn is_urgent(&self) -> bool {
        matches!(self.priority, Some(Priority::Urgent))
    }
}

/// Payload of `social_media_updated`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SocialMediaBatch {
    #[serde(default)]
    pub posts: Vec<SocialPost>,
}

impl SocialMediaBatch {
    /// Number of posts flagged `urgent`.
    pub fn urgent_count(&self) -> usize {
        self.posts.iter().filter(|post| post.is_urgent()).count()
    }
}

/// Payload of `report_verified`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Payload of `urgent_notification`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UrgentNotice {
    pub message: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

// ── ServerEvent ─────────────────────────────────────────────────────

/// An inbound event, typed where the name is known.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(Value),
    DisasterUpdated(EntityChange),
    ResourcesUpdated(EntityChange),
    SocialMediaUpdated(SocialMediaBatch),
    ReportVerified(VerificationOutcome),
    UserCount(u64),
    UrgentNotification(UrgentNotice),
    /// An event this client has no shape for, or a known name whose payload
    /// did not match. Still routed by `name`.
    Unknown { name: String, payload: Value },
}

impl ServerEvent {
    /// Convert a wire frame into a typed event.
    pub fn from_frame(frame: Frame) -> Self {
        let Frame { event, data } = frame;
        let Some(kind) = EventKind::from_name(&event) else {
            return Self::Unknown {
                name: event,
                payload: data,
            };
        };

        let parsed = match kind {
            EventKind::Connected => Ok(Self::Connected(data.clone())),
            EventKind::DisasterUpdated => {
                serde_json::from_value(data.clone()).map(Self::DisasterUpdated)
            }
            EventKind::ResourcesUpdated => {
                serde_json::from_value(data.clone()).map(Self::ResourcesUpdated)
            }
            EventKind::SocialMediaUpdated => {
                serde_json::from_value(data.clone()).map(Self::SocialMediaUpdated)
            }
            EventKind::ReportVerified => {
                serde_json::from_value(data.clone()).map(Self::ReportVerified)
            }
            EventKind::UserCount => serde_json::from_value(data.clone()).map(Self::UserCount),
            EventKind::UrgentNotification => {
                serde_json::from_value(data.clone()).map(Self::UrgentNotification)
            }
        };

        parsed.unwrap_or_else(|e| {
            warn!(event = %event, "payload does not match known shape: {e}");
            Self::Unknown {
                name: event,
                payload: data,
            }
        })
    }

    /// Wire name of the event, used as the routing key.
    pub fn name(&self) -> &str {
        match self {
            Self::Unknown { name, .. } => name,
            known => known.kind().map_or("", EventKind::as_str),
        }
    }

    /// The known kind, or `None` for [`ServerEvent::Unknown`].
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Connected(_) => Some(EventKind::Connected),
            Self::DisasterUpdated(_) => Some(EventKind::DisasterUpdated),
            Self::ResourcesUpdated(_) => Some(EventKind::ResourcesUpdated),
            Self::SocialMediaUpdated(_) => Some(EventKind::SocialMediaUpdated),
            Self::ReportVerified(_) => Some(EventKind::ReportVerified),
            Self::UserCount(_) => Some(EventKind::UserCount),
            Self::UrgentNotification(_) => Some(EventKind::UrgentNotification),
            Self::Unknown { .. } => None,
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
    use serde_json::json;

    fn event(name: &str, data: Value) -> ServerEvent {
        ServerEvent::from_frame(Frame::new(name, data))
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("chat_message"), None);
    }

    #[test]
    fn disaster_create_is_typed() {
        let ev = event(
            "disaster_updated",
            json!({"type": "create", "data": {"id": 12, "title": "Flood A"}}),
        );
        let ServerEvent::DisasterUpdated(change) = &ev else {
            panic!("expected DisasterUpdated, got {ev:?}");
        };
        assert_eq!(change.change, ChangeKind::Create);
        assert_eq!(change.text_field("title"), Some("Flood A"));
        assert_eq!(change.entity_id().as_deref(), Some("12"));
        assert_eq!(ev.name(), "disaster_updated");
    }

    #[test]
    fn unrecognised_change_type_is_preserved() {
        let ev = event("resources_updated", json!({"type": "archive"}));
        let ServerEvent::ResourcesUpdated(change) = ev else {
            panic!("expected ResourcesUpdated");
        };
        assert_eq!(change.change, ChangeKind::Other("archive".into()));
        assert_eq!(change.data, Value::Null);
    }

    #[test]
    fn social_batch_counts_urgent_posts() {
        let ev = event(
            "social_media_updated",
            json!({"posts": [
                {"priority": "urgent", "content": "help"},
                {"priority": "low"},
                {"content": "no priority"}
            ]}),
        );
        let ServerEvent::SocialMediaUpdated(batch) = ev else {
            panic!("expected SocialMediaUpdated");
        };
        assert_eq!(batch.posts.len(), 3);
        assert_eq!(batch.urgent_count(), 1);
        assert_eq!(
            batch.posts[0].fields.get("content"),
            Some(&json!("help"))
        );
    }

    #[test]
    fn user_count_takes_plain_integer() {
        assert_eq!(event("user_count", json!(14)), ServerEvent::UserCount(14));
    }

    #[test]
    fn mismatched_payload_falls_back_to_unknown() {
        let ev = event("user_count", json!("many"));
        assert_eq!(ev.kind(), None);
        assert_eq!(ev.name(), "user_count");
    }

    #[test]
    fn unknown_names_are_kept() {
        let ev = event("shelter_opened", json!({"id": "s1"}));
        assert_eq!(
            ev,
            ServerEvent::Unknown {
                name: "shelter_opened".into(),
                payload: json!({"id": "s1"}),
            }
        );
        assert_eq!(ev.name(), "shelter_opened");
    }
}
