use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: Uuid,
    pub online: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
struct Entry {
    connections: usize,
    online: bool,
    last_heartbeat: OffsetDateTime,
    last_seen_at: OffsetDateTime,
}

/// Connection-counted online state plus short-lived typing indicators.
///
/// All methods take `now` explicitly; the owner decides the clock.
#[derive(Debug)]
pub struct PresenceTracker {
    users: HashMap<Uuid, Entry>,
    typing: HashMap<(Uuid, Uuid), OffsetDateTime>,
    heartbeat_timeout: Duration,
    typing_ttl: Duration,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(heartbeat_timeout: Duration, typing_ttl: Duration) -> Self {
        Self { users: HashMap::new(), typing: HashMap::new(), heartbeat_timeout, typing_ttl }
    }

    /// Registers a new connection. Returns an update when the user comes online.
    pub fn connect(&mut self, user_id: Uuid, now: OffsetDateTime) -> Option<PresenceUpdate> {
        let entry = self.users.entry(user_id).or_insert(Entry {
            connections: 0,
            online: false,
            last_heartbeat: now,
            last_seen_at: now,
        });
        entry.connections += 1;
        entry.last_heartbeat = now;
        entry.last_seen_at = now;
        if entry.online {
            return None;
        }
        entry.online = true;
        Some(PresenceUpdate { user_id, online: true, last_seen_at: Some(now) })
    }

    /// Refreshes liveness. A user swept offline while still connected comes back online.
    pub fn heartbeat(&mut self, user_id: Uuid, now: OffsetDateTime) -> Option<PresenceUpdate> {
        let entry = self.users.get_mut(&user_id)?;
        if entry.connections == 0 {
            return None;
        }
        entry.last_heartbeat = now;
        entry.last_seen_at = now;
        if entry.online {
            return None;
        }
        entry.online = true;
        Some(PresenceUpdate { user_id, online: true, last_seen_at: Some(now) })
    }

    /// Drops one connection. Returns an update when the last one closes.
    pub fn disconnect(&mut self, user_id: Uuid, now: OffsetDateTime) -> Option<PresenceUpdate> {
        let entry = self.users.get_mut(&user_id)?;
        entry.connections = entry.connections.saturating_sub(1);
        entry.last_seen_at = now;
        if entry.connections > 0 {
            return None;
        }
        self.typing.retain(|(_, typist), _| *typist != user_id);
        let was_online = std::mem::replace(&mut entry.online, false);
        was_online.then_some(PresenceUpdate { user_id, online: false, last_seen_at: Some(now) })
    }

    #[must_use]
    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.users.get(&user_id).map_or(0, |e| e.connections)
    }

    /// Marks users offline whose last heartbeat is older than the timeout and
    /// drops expired typing entries.
    pub fn sweep(&mut self, now: OffsetDateTime) -> Vec<PresenceUpdate> {
        let deadline = now - self.heartbeat_timeout;
        let mut updates = Vec::new();

        for (user_id, entry) in &mut self.users {
            if entry.online && entry.last_heartbeat < deadline {
                entry.online = false;
                updates.push(PresenceUpdate { user_id: *user_id, online: false, last_seen_at: Some(entry.last_seen_at) });
            }
        }
        self.users.retain(|_, e| e.online || e.connections > 0 || e.last_seen_at >= deadline);
        self.typing.retain(|_, expires_at| *expires_at >= now);

        updates
    }

    #[must_use]
    pub fn snapshot(&self, user_id: Uuid) -> PresenceUpdate {
        self.users.get(&user_id).map_or(PresenceUpdate { user_id, online: false, last_seen_at: None }, |e| {
            PresenceUpdate { user_id, online: e.online, last_seen_at: Some(e.last_seen_at) }
        })
    }

    /// Records a typing signal and returns when it lapses.
    pub fn set_typing(&mut self, appointment_id: Uuid, user_id: Uuid, now: OffsetDateTime) -> OffsetDateTime {
        let expires_at = now + self.typing_ttl;
        self.typing.insert((appointment_id, user_id), expires_at);
        expires_at
    }

    #[must_use]
    pub fn is_typing(&self, appointment_id: Uuid, user_id: Uuid, now: OffsetDateTime) -> bool {
        self.typing.get(&(appointment_id, user_id)).is_some_and(|expires_at| now <= *expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(Duration::seconds(30), Duration::seconds(1))
    }

    #[test]
    fn test_multiple_connections_counted() {
        let mut presence = tracker();
        let user = Uuid::new_v4();

        assert!(presence.connect(user, T0).is_some());
        assert!(presence.connect(user, T0).is_none());
        assert_eq!(presence.connection_count(user), 2);

        assert!(presence.disconnect(user, T0).is_none());
        let update = presence.disconnect(user, T0).unwrap();
        assert!(!update.online);
        assert!(!presence.snapshot(user).online);
    }

    #[test]
    fn test_sweep_marks_stale_users_offline() {
        let mut presence = tracker();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        presence.connect(stale, T0);
        presence.connect(fresh, T0);
        presence.heartbeat(fresh, T0 + Duration::seconds(25));

        let updates = presence.sweep(T0 + Duration::seconds(40));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].user_id, stale);
        assert!(presence.snapshot(fresh).online);

        let revived = presence.heartbeat(stale, T0 + Duration::seconds(41)).unwrap();
        assert!(revived.online);
    }

    #[test]
    fn test_typing_expires_after_ttl() {
        let mut presence = tracker();
        let appt = Uuid::new_v4();
        let user = Uuid::new_v4();

        let expires_at = presence.set_typing(appt, user, T0);
        assert_eq!(expires_at, T0 + Duration::seconds(1));
        assert!(presence.is_typing(appt, user, T0 + Duration::milliseconds(500)));
        assert!(!presence.is_typing(appt, user, T0 + Duration::milliseconds(1500)));
        assert!(!presence.is_typing(Uuid::new_v4(), user, T0));
    }

    #[test]
    fn test_unknown_user_is_offline() {
        let presence = tracker();
        let snap = presence.snapshot(Uuid::new_v4());
        assert!(!snap.online);
        assert!(snap.last_seen_at.is_none());
    }
}
