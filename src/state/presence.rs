use std::time::{Duration, SystemTime};

use indexmap::IndexMap;

use super::ConnectionId;
use crate::dao::models::UserEntity;

/// Live presence of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Client-generated identity; several connections may share it.
    pub user_id: String,
    /// Trimmed display name.
    pub nickname: String,
    /// Normalized `#RRGGBB` color.
    pub color: String,
    /// Registration time, refreshed by every write from the connection.
    pub last_activity: SystemTime,
}

/// Change to the durable user record implied by a registry mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum UserRecordUpdate {
    /// The user registered on some connection.
    Online(UserEntity),
    /// The last connection carrying this user id left the registry.
    Offline {
        /// Identity whose record is marked offline.
        user_id: String,
    },
}

impl UserRecordUpdate {
    /// Identity the update applies to.
    pub fn user_id(&self) -> &str {
        match self {
            Self::Online(user) => &user.user_id,
            Self::Offline { user_id } => user_id,
        }
    }
}

/// Registry of registered connections, in registration order.
///
/// Entries only exist while their connection is open and active: a disconnect or an idle
/// sweep removes them outright. The registry trusts its input; nickname validation happens
/// before reaching it.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: IndexMap<ConnectionId, PresenceEntry>,
}

impl PresenceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the entry of `connection_id`, returning the replaced entry.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        user_id: String,
        nickname: String,
        color: String,
    ) -> Option<PresenceEntry> {
        self.register_at(connection_id, user_id, nickname, color, SystemTime::now())
    }

    pub(crate) fn register_at(
        &mut self,
        connection_id: ConnectionId,
        user_id: String,
        nickname: String,
        color: String,
        now: SystemTime,
    ) -> Option<PresenceEntry> {
        self.entries.insert(
            connection_id,
            PresenceEntry {
                user_id,
                nickname,
                color,
                last_activity: now,
            },
        )
    }

    /// Refresh the activity timestamp. Returns `false` when the connection is not registered.
    pub fn touch(&mut self, connection_id: &ConnectionId) -> bool {
        self.touch_at(connection_id, SystemTime::now())
    }

    pub(crate) fn touch_at(&mut self, connection_id: &ConnectionId, now: SystemTime) -> bool {
        match self.entries.get_mut(connection_id) {
            Some(entry) => {
                entry.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Drop the entry of a closed connection.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<PresenceEntry> {
        self.entries.shift_remove(connection_id)
    }

    /// Evict every entry idle for longer than `max_idle`, returning the evicted entries.
    pub fn sweep(&mut self, max_idle: Duration) -> Vec<PresenceEntry> {
        self.sweep_at(max_idle, SystemTime::now())
    }

    pub(crate) fn sweep_at(&mut self, max_idle: Duration, now: SystemTime) -> Vec<PresenceEntry> {
        let mut evicted = Vec::new();
        self.entries.retain(|_, entry| {
            let idle = now
                .duration_since(entry.last_activity)
                .unwrap_or(Duration::ZERO);
            if idle > max_idle {
                evicted.push(entry.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Entry of `connection_id`, if registered.
    pub fn get(&self, connection_id: &ConnectionId) -> Option<&PresenceEntry> {
        self.entries.get(connection_id)
    }

    /// Whether any connection is still registered under `user_id`.
    pub fn has_user(&self, user_id: &str) -> bool {
        self.entries.values().any(|entry| entry.user_id == user_id)
    }

    /// Snapshot of all entries in registration order.
    pub fn list_all(&self) -> Vec<PresenceEntry> {
        self.entries.values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn register(registry: &mut PresenceRegistry, id: ConnectionId, nickname: &str, at: SystemTime) {
        registry.register_at(id, format!("user-{nickname}"), nickname.into(), "#FF0000".into(), at);
    }

    #[test]
    fn re_registration_replaces_the_entry() {
        let mut registry = PresenceRegistry::new();
        let conn = Uuid::new_v4();
        registry.register(conn, "u1".into(), "first".into(), "#000000".into());
        registry.register(conn, "u1".into(), "second".into(), "#FFFFFF".into());

        assert_eq!(registry.len(), 1);
        let entry = registry.get(&conn).unwrap();
        assert_eq!(entry.nickname, "second");
        assert_eq!(entry.color, "#FFFFFF");
    }

    #[test]
    fn has_user_tracks_remaining_connections() {
        let mut registry = PresenceRegistry::new();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(registry.register(first, "u1".into(), "tab".into(), "#000000".into()).is_none());
        registry.register(second, "u1".into(), "tab".into(), "#000000".into());

        registry.remove(&first);
        assert!(registry.has_user("u1"));
        registry.remove(&second);
        assert!(!registry.has_user("u1"));
    }

    #[test]
    fn list_all_follows_registration_order() {
        let mut registry = PresenceRegistry::new();
        let now = SystemTime::now();
        let ids: Vec<_> = (0..3).map(|_| Uuid::new_v4()).collect();
        register(&mut registry, ids[0], "ann", now);
        register(&mut registry, ids[1], "bob", now);
        register(&mut registry, ids[2], "cyd", now);
        registry.remove(&ids[1]);

        let names: Vec<_> = registry
            .list_all()
            .into_iter()
            .map(|entry| entry.nickname)
            .collect();
        assert_eq!(names, vec!["ann", "cyd"]);
    }

    #[test]
    fn touch_ignores_unregistered_connections() {
        let mut registry = PresenceRegistry::new();
        assert!(!registry.touch(&Uuid::new_v4()));
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_evicts_only_idle_entries() {
        let mut registry = PresenceRegistry::new();
        let now = SystemTime::now();
        let max_idle = Duration::from_secs(600);
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let touched = Uuid::new_v4();
        register(&mut registry, stale, "old", now - Duration::from_secs(601));
        register(&mut registry, fresh, "new", now - Duration::from_secs(60));
        register(&mut registry, touched, "act", now - Duration::from_secs(900));
        assert!(registry.touch_at(&touched, now));

        let evicted = registry.sweep_at(max_idle, now);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].nickname, "old");
        assert_eq!(registry.len(), 2);
        assert!(registry.list_all().iter().all(|entry| {
            now.duration_since(entry.last_activity).unwrap() <= max_idle
        }));
    }

    #[test]
    fn entry_exactly_at_threshold_survives() {
        let mut registry = PresenceRegistry::new();
        let now = SystemTime::now();
        register(&mut registry, Uuid::new_v4(), "edge", now - Duration::from_secs(600));
        assert!(registry.sweep_at(Duration::from_secs(600), now).is_empty());
    }
}
