use crate::config::PresenceConfig;
use crate::domain::event::BusEvent;
use crate::domain::presence::{PresenceTracker, PresenceUpdate};
use crate::services::event_bus::EventBus;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    online_users: UpDownCounter<i64>,
    swept_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            online_users: meter
                .i64_up_down_counter("rendezvous_presence_online_users")
                .with_description("Number of users currently online")
                .build(),
            swept_total: meter
                .u64_counter("rendezvous_presence_swept_total")
                .with_description("Users marked offline after missing heartbeats")
                .build(),
        }
    }

    fn record(&self, update: &PresenceUpdate, source: &'static str) {
        let delta = if update.online { 1 } else { -1 };
        self.online_users.add(delta, &[KeyValue::new("source", source)]);
    }
}

#[derive(Clone, Debug)]
pub struct PresenceService {
    tracker: Arc<Mutex<PresenceTracker>>,
    bus: EventBus,
    metrics: Metrics,
}

impl PresenceService {
    #[must_use]
    pub fn new(config: &PresenceConfig, bus: EventBus) -> Self {
        let timeout = Duration::seconds(i64::try_from(config.heartbeat_timeout_secs).unwrap_or(i64::MAX));
        let typing_ttl = Duration::milliseconds(i64::try_from(config.typing_ttl_ms).unwrap_or(i64::MAX));
        Self {
            tracker: Arc::new(Mutex::new(PresenceTracker::new(timeout, typing_ttl))),
            bus,
            metrics: Metrics::new(),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, PresenceTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, update: Option<PresenceUpdate>, source: &'static str) {
        if let Some(update) = update {
            self.metrics.record(&update, source);
            self.bus.publish_presence(update);
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn connect(&self, user_id: Uuid) {
        let update = self.tracker().connect(user_id, OffsetDateTime::now_utc());
        self.publish(update, "connect");
    }

    pub fn heartbeat(&self, user_id: Uuid) {
        let update = self.tracker().heartbeat(user_id, OffsetDateTime::now_utc());
        self.publish(update, "heartbeat");
    }

    /// Returns `true` when this was the user's last open connection.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn disconnect(&self, user_id: Uuid) -> bool {
        let mut tracker = self.tracker();
        let update = tracker.disconnect(user_id, OffsetDateTime::now_utc());
        let last = tracker.connection_count(user_id) == 0;
        drop(tracker);
        self.publish(update, "disconnect");
        last
    }

    /// Marks users offline whose heartbeat lapsed. Returns how many changed.
    pub fn sweep(&self, now: OffsetDateTime) -> usize {
        let updates = self.tracker().sweep(now);
        let count = updates.len();
        for update in updates {
            self.publish(Some(update), "sweep");
        }
        if count > 0 {
            self.metrics.swept_total.add(count as u64, &[]);
            tracing::info!(count, "Presence sweep marked users offline");
        }
        count
    }

    #[must_use]
    pub fn snapshot(&self, user_id: Uuid) -> PresenceUpdate {
        self.tracker().snapshot(user_id)
    }

    /// Records a typing signal and announces it on the appointment channel.
    pub fn set_typing(&self, appointment_id: Uuid, user_id: Uuid) -> OffsetDateTime {
        let expires_at = self.tracker().set_typing(appointment_id, user_id, OffsetDateTime::now_utc());
        self.bus.publish_to_appointment(appointment_id, BusEvent::Typing { appointment_id, user_id, expires_at });
        expires_at
    }

    #[must_use]
    pub fn is_typing(&self, appointment_id: Uuid, user_id: Uuid) -> bool {
        self.tracker().is_typing(appointment_id, user_id, OffsetDateTime::now_utc())
    }
}
