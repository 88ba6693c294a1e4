//! Membership of entity-scoped rooms.
//!
//! The registry only ever changes through explicit [`join`](RoomRegistry::join)
//! and [`leave`](RoomRegistry::leave) calls; inbound server events never
//! touch it. Each call reports what, if anything, must go over the wire.

/// What the caller has to do after a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAction {
    /// Send the control message now.
    Send,
    /// Membership recorded; the join is replayed on the next connect.
    Deferred,
    /// Nothing changed and nothing needs sending.
    Unchanged,
}

/// Set of joined rooms, kept in join order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomRegistry {
    rooms: Vec<String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record membership of `entity_id`.
    ///
    /// Joining a room twice is a no-op: no duplicate join is ever sent.
    pub fn join(&mut self, entity_id: &str, connected: bool) -> RoomAction {
        if self.contains(entity_id) {
            return RoomAction::Unchanged;
        }
        self.rooms.push(entity_id.to_owned());
        if connected {
            RoomAction::Send
        } else {
            RoomAction::Deferred
        }
    }

    /// Drop membership of `entity_id`.
    ///
    /// A leave is only sent when connected; offline it is purely local since
    /// no join was sent for the current connection.
    pub fn leave(&mut self, entity_id: &str, connected: bool) -> RoomAction {
        let before = self.rooms.len();
        self.rooms.retain(|room| room != entity_id);
        if self.rooms.len() == before {
            RoomAction::Unchanged
        } else if connected {
            RoomAction::Send
        } else {
            RoomAction::Unchanged
        }
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.rooms.iter().any(|room| room == entity_id)
    }

    /// Rooms to replay after a successful connect, in join order.
    pub fn snapshot(&self) -> Vec<String> {
        self.rooms.clone()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
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

    #[test]
    fn join_while_connected_sends_once() {
        let mut rooms = RoomRegistry::new();
        assert_eq!(rooms.join("r1", true), RoomAction::Send);
        assert_eq!(rooms.join("r1", true), RoomAction::Unchanged);
        assert_eq!(rooms.snapshot(), vec!["r1".to_string()]);
    }

    #[test]
    fn join_while_offline_is_deferred() {
        let mut rooms = RoomRegistry::new();
        assert_eq!(rooms.join("r1", false), RoomAction::Deferred);
        assert_eq!(rooms.join("r1", false), RoomAction::Unchanged);
        assert!(rooms.contains("r1"));
        assert_eq!(rooms.len(), 1);
    }

    #[test]
    fn leave_sends_only_when_connected() {
        let mut rooms = RoomRegistry::new();
        rooms.join("r1", false);
        rooms.join("r2", false);
        assert_eq!(rooms.leave("r1", true), RoomAction::Send);
        assert_eq!(rooms.leave("r2", false), RoomAction::Unchanged);
        assert!(rooms.is_empty());
    }

    #[test]
    fn leaving_unknown_room_changes_nothing() {
        let mut rooms = RoomRegistry::new();
        rooms.join("r1", true);
        assert_eq!(rooms.leave("r9", true), RoomAction::Unchanged);
        assert_eq!(rooms.len(), 1);
    }

    #[test]
    fn snapshot_keeps_join_order() {
        let mut rooms = RoomRegistry::new();
        for id in ["c", "a", "b"] {
            rooms.join(id, false);
        }
        assert_eq!(rooms.snapshot(), vec!["c", "a", "b"]);
        rooms.clear();
        assert!(rooms.snapshot().is_empty());
    }
}
