//! Tracks every user who interacts with the bot.
//!
//! The register survives restarts through an
//! [`ActivitySnapshotStore`](crate::domain::ports::ActivitySnapshotStore).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::user::{Role, UserId};

/// Interaction summary for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// User identity.
    pub user: UserId,
    /// Last display name reported by the transport.
    pub display_name: Option<String>,
    /// Most privileged role at the last interaction.
    pub role: Role,
    /// First interaction.
    pub first_seen: DateTime<Utc>,
    /// Most recent interaction.
    pub last_seen: DateTime<Utc>,
    /// Number of commands received.
    pub message_count: u64,
}

/// Serialisable copy of the whole register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    /// One entry per known user.
    pub entries: Vec<ActivityEntry>,
}

/// Concurrent per-user activity register.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    entries: DashMap<UserId, ActivityEntry>,
}

impl ActivityTracker {
    /// Build an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one interaction.
    pub fn record(
        &self,
        user: UserId,
        display_name: Option<&str>,
        role: Role,
        now: DateTime<Utc>,
    ) {
        let mut entry = self.entries.entry(user).or_insert_with(|| ActivityEntry {
            user,
            display_name: None,
            role,
            first_seen: now,
            last_seen: now,
            message_count: 0,
        });
        if let Some(name) = display_name.filter(|name| !name.trim().is_empty()) {
            entry.display_name = Some(name.to_owned());
        }
        entry.role = role;
        entry.last_seen = now;
        entry.message_count = entry.message_count.saturating_add(1);
    }

    /// Rebuild a register from a saved snapshot.
    pub fn restore(snapshot: ActivitySnapshot) -> Self {
        let entries = snapshot
            .entries
            .into_iter()
            .map(|entry| (entry.user, entry))
            .collect();
        Self { entries }
    }

    /// Copy of every entry, for persistence.
    pub fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            entries: self.entries(),
        }
    }

    /// Refresh the recorded role of a known user.
    ///
    /// Returns `false` when `user` has never interacted with the bot.
    pub fn update_role(&self, user: UserId, role: Role) -> bool {
        let Some(mut entry) = self.entries.get_mut(&user) else {
            return false;
        };
        entry.role = role;
        true
    }

    /// Number of users seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody has interacted yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, most recently seen first.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        let mut entries: Vec<ActivityEntry> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.user.cmp(&b.user)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn counts_messages_and_orders_by_recency() {
        let tracker = ActivityTracker::new();
        let t0 = Utc
            .with_ymd_and_hms(2026, 10, 1, 12, 0, 0)
            .single()
            .expect("valid time");
        let later = t0 + chrono::TimeDelta::minutes(5);

        tracker.record(UserId::new(1), Some("Ana"), Role::Admin, t0);
        tracker.record(UserId::new(2), None, Role::User, t0);
        tracker.record(UserId::new(2), Some("Bruno"), Role::Moderator, later);

        let entries = tracker.entries();
        assert_eq!(entries.len(), 2);
        let first = entries.first().expect("first entry");
        assert_eq!(first.user, UserId::new(2));
        assert_eq!(first.message_count, 2);
        assert_eq!(first.first_seen, t0);
        assert_eq!(first.display_name.as_deref(), Some("Bruno"));
        assert_eq!(first.role, Role::Moderator);
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let tracker = ActivityTracker::new();
        let now = Utc::now();
        tracker.record(UserId::new(4), Some("Davi"), Role::User, now);
        tracker.record(UserId::new(4), None, Role::User, now);

        let restored = ActivityTracker::restore(tracker.snapshot());
        assert_eq!(restored.len(), 1);
        restored.record(UserId::new(4), None, Role::User, now);
        assert_eq!(
            restored.entries().first().map(|entry| entry.message_count),
            Some(3)
        );
    }

    #[test]
    fn role_updates_only_touch_known_users() {
        let tracker = ActivityTracker::new();
        tracker.record(UserId::new(5), None, Role::User, Utc::now());
        assert!(tracker.update_role(UserId::new(5), Role::Moderator));
        assert!(!tracker.update_role(UserId::new(6), Role::Moderator));
        assert_eq!(
            tracker.entries().first().map(|entry| entry.role),
            Some(Role::Moderator)
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn blank_names_do_not_overwrite() {
        let tracker = ActivityTracker::new();
        let now = Utc::now();
        tracker.record(UserId::new(3), Some("Carla"), Role::User, now);
        tracker.record(UserId::new(3), Some("  "), Role::User, now);
        let entries = tracker.entries();
        assert_eq!(
            entries.first().and_then(|e| e.display_name.as_deref()),
            Some("Carla")
        );
    }
}
