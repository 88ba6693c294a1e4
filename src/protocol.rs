//! Wire envelope and outbound control messages.
//!
//! Every message on the wire, in either direction, is a JSON text frame of
//! the form `{"event": "<name>", "data": <json>}`. Inbound frames are turned
//! into typed [`ServerEvent`](crate::event::ServerEvent)s; outbound traffic is
//! described by [`ClientMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Event names ─────────────────────────────────────────────────────

/// Outbound: join the well-known default channel.
pub const JOIN_GENERAL: &str = "join_general";

/// Outbound: join the room scoped to one entity.
pub const JOIN_ROOM: &str = "join_disaster";

/// Outbound: leave the room scoped to one entity.
pub const LEAVE_ROOM: &str = "leave_disaster";

// ── Envelope ────────────────────────────────────────────────────────

/// A single named message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name used for routing.
    pub event: String,
    /// Arbitrary JSON payload. Missing payloads deserialize as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a frame from a name and payload.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse a frame from a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`LiveSyncError::Serialization`](crate::LiveSyncError::Serialization)
    /// when the text is not a valid envelope.
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize this frame to a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`LiveSyncError::Serialization`](crate::LiveSyncError::Serialization)
    /// if the payload cannot be encoded.
    pub fn to_text(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Outbound messages ───────────────────────────────────────────────

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join the default broadcast channel. Sent after every successful connect.
    JoinGeneral,
    /// Join the room for one entity.
    JoinRoom { entity_id: String },
    /// Leave the room for one entity.
    LeaveRoom { entity_id: String },
    /// Application-defined event, sent best-effort.
    Custom { event: String, data: Value },
}

impl ClientMessage {
    /// Event name this message is sent under.
    pub fn event_name(&self) -> &str {
        match self {
            Self::JoinGeneral => JOIN_GENERAL,
            Self::JoinRoom { .. } => JOIN_ROOM,
            Self::LeaveRoom { .. } => LEAVE_ROOM,
            Self::Custom { event, .. } => event,
        }
    }

    /// Convert into the wire envelope.
    pub fn into_frame(self) -> Frame {
        match self {
            Self::JoinGeneral => Frame::new(JOIN_GENERAL, Value::Null),
            Self::JoinRoom { entity_id } => Frame::new(JOIN_ROOM, Value::String(entity_id)),
            Self::LeaveRoom { entity_id } => Frame::new(LEAVE_ROOM, Value::String(entity_id)),
            Self::Custom { event, data } => Frame::new(event, data),
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

    #[test]
    fn missing_data_defaults_to_null() {
        let frame = Frame::parse(r#"{"event":"connected"}"#).unwrap();
        assert_eq!(frame.event, "connected");
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn join_room_carries_entity_id_as_data() {
        let frame = ClientMessage::JoinRoom {
            entity_id: "d-17".into(),
        }
        .into_frame();
        let text = frame.to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event": "join_disaster", "data": "d-17"}));
    }

    #[test]
    fn custom_message_uses_its_own_name() {
        let msg = ClientMessage::Custom {
            event: "typing".into(),
            data: json!({"on": true}),
        };
        assert_eq!(msg.event_name(), "typing");
        assert_eq!(msg.into_frame().data, json!({"on": true}));
    }

    #[test]
    fn frame_without_event_is_rejected() {
        assert!(Frame::parse(r#"{"data":1}"#).is_err());
        assert!(Frame::parse("not json").is_err());
    }
}
