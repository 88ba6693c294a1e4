//! Last known online peer count.

/// Holds the most recent `user_count` pushed by the server.
///
/// The value is replaced, never accumulated, and drops back to zero whenever
/// the connection is lost or stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceTracker {
    count: u64,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.count
    }

    /// Replace the count. Returns `true` if it changed.
    pub(crate) fn update(&mut self, count: u64) -> bool {
        let changed = self.count != count;
        self.count = count;
        changed
    }

    pub(crate) fn reset(&mut self) -> bool {
        self.update(0)
    }
}
