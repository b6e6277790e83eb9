use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{PresenceStatus, UserId},
    protocol::PresencePayload,
};

/// Live presence for one user. Entries are created lazily and never removed;
/// a stale entry keeps its last known `last_seen_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Default for PresenceEntry {
    fn default() -> Self {
        Self {
            status: PresenceStatus::Offline,
            last_seen_at: None,
        }
    }
}

/// Per-user presence map. Mutated only by the owning event loop; readers get
/// point queries. Conflict resolution is last-writer-wins by arrival order.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    entries: HashMap<UserId, PresenceEntry>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one inbound presence event. Returns whether anything changed,
    /// so re-applying the same event is a no-op for observers.
    pub fn apply(&mut self, update: &PresencePayload) -> bool {
        let entry = self.entries.entry(update.user_id).or_default();
        let next = PresenceEntry {
            status: update.status,
            // A payload without a last-seen keeps whatever we knew before.
            last_seen_at: update.last_seen_at.or(entry.last_seen_at),
        };
        let changed = *entry != next;
        *entry = next;
        changed
    }

    /// Unknown users are `Offline`; this never fails.
    pub fn status(&self, user_id: UserId) -> PresenceStatus {
        self.entries
            .get(&user_id)
            .map(|entry| entry.status)
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.entries.get(&user_id).and_then(|entry| entry.last_seen_at)
    }

    /// Last-seen is only meaningful for offline users; any other status
    /// suppresses it.
    pub fn displayable_last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        match self.status(user_id) {
            PresenceStatus::Offline => self.last_seen(user_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
