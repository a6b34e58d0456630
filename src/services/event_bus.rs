use crate::config::EventBusConfig;
use crate::domain::appointment::Appointment;
use crate::domain::event::BusEvent;
use crate::domain::presence::PresenceUpdate;
use crate::error::{AppError, Result};
use dashmap::{DashMap, mapref::entry::Entry};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    published_total: Counter<u64>,
    unrouted_total: Counter<u64>,
    active_channels: UpDownCounter<i64>,
    active_subscriptions: UpDownCounter<i64>,
    gc_duration_seconds: Histogram<f64>,
    gc_reclaimed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            published_total: meter
                .u64_counter("rendezvous_events_published_total")
                .with_description("Total events published on the bus")
                .build(),
            unrouted_total: meter
                .u64_counter("rendezvous_events_unrouted_total")
                .with_description("Events published to a channel with no local subscribers")
                .build(),
            active_channels: meter
                .i64_up_down_counter("rendezvous_event_channels")
                .with_description("Number of live appointment and user channels")
                .build(),
            active_subscriptions: meter
                .i64_up_down_counter("rendezvous_appointment_subscriptions")
                .with_description("Number of live appointment subscriptions")
                .build(),
            gc_duration_seconds: meter
                .f64_histogram("rendezvous_event_gc_duration_seconds")
                .with_description("Time taken to perform a single GC iteration")
                .build(),
            gc_reclaimed_total: meter
                .u64_counter("rendezvous_event_channels_reclaimed_total")
                .with_description("Total number of stale channels reclaimed by GC")
                .build(),
        }
    }
}

type Registry = Arc<DashMap<(Uuid, Uuid), ()>>;

/// Scoped membership of one subscriber in one appointment channel.
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    appointment_id: Uuid,
    subscriber_id: Uuid,
    rx: broadcast::Receiver<BusEvent>,
    registry: Registry,
    metrics: Metrics,
}

impl Subscription {
    #[must_use]
    pub const fn appointment_id(&self) -> Uuid {
        self.appointment_id
    }

    /// # Errors
    /// Propagates `Lagged` and `Closed` from the underlying broadcast channel.
    pub async fn recv(&mut self) -> std::result::Result<BusEvent, broadcast::error::RecvError> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.remove(&(self.appointment_id, self.subscriber_id)).is_some() {
            self.metrics.active_subscriptions.add(-1, &[]);
        }
    }
}

/// Fan-out of domain events. Appointment channels carry chat traffic for
/// subscribed sessions; user feeds carry events addressed to one person; the
/// admin feed mirrors appointment changes; presence is a single global stream
/// filtered by each session.
#[derive(Clone, Debug)]
pub struct EventBus {
    appointments: Arc<DashMap<Uuid, broadcast::Sender<BusEvent>>>,
    users: Arc<DashMap<Uuid, broadcast::Sender<BusEvent>>>,
    registry: Registry,
    admin_tx: broadcast::Sender<BusEvent>,
    presence_tx: broadcast::Sender<PresenceUpdate>,
    channel_capacity: usize,
    metrics: Metrics,
}

impl EventBus {
    #[must_use]
    pub fn new(config: &EventBusConfig) -> Self {
        let (admin_tx, _) = broadcast::channel(config.global_channel_capacity);
        let (presence_tx, _) = broadcast::channel(config.global_channel_capacity);
        Self {
            appointments: Arc::new(DashMap::new()),
            users: Arc::new(DashMap::new()),
            registry: Arc::new(DashMap::new()),
            admin_tx,
            presence_tx,
            channel_capacity: config.channel_capacity,
            metrics: Metrics::new(),
        }
    }

    /// Subscribes while the shard lock is held, so a concurrent GC pass never
    /// reclaims the channel between lookup and subscription.
    fn receiver(&self, map: &DashMap<Uuid, broadcast::Sender<BusEvent>>, key: Uuid) -> broadcast::Receiver<BusEvent> {
        map.entry(key)
            .or_insert_with(|| {
                self.metrics.active_channels.add(1, &[]);
                let (tx, _rx) = broadcast::channel(self.channel_capacity);
                tx
            })
            .subscribe()
    }

    /// Joins `subscriber_id` to the appointment's channel.
    ///
    /// # Errors
    /// Returns `AppError::Conflict` if the subscriber is already joined.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn subscribe(&self, appointment_id: Uuid, subscriber_id: Uuid) -> Result<Subscription> {
        match self.registry.entry((appointment_id, subscriber_id)) {
            Entry::Occupied(_) => return Err(AppError::Conflict("already subscribed".into())),
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        self.metrics.active_subscriptions.add(1, &[]);

        let rx = self.receiver(&self.appointments, appointment_id);
        Ok(Subscription {
            appointment_id,
            subscriber_id,
            rx,
            registry: Arc::clone(&self.registry),
            metrics: self.metrics.clone(),
        })
    }

    #[must_use]
    pub fn is_subscribed(&self, appointment_id: Uuid, subscriber_id: Uuid) -> bool {
        self.registry.contains_key(&(appointment_id, subscriber_id))
    }

    pub fn subscribe_user(&self, user_id: Uuid) -> broadcast::Receiver<BusEvent> {
        self.receiver(&self.users, user_id)
    }

    pub fn subscribe_admin(&self) -> broadcast::Receiver<BusEvent> {
        self.admin_tx.subscribe()
    }

    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceUpdate> {
        self.presence_tx.subscribe()
    }

    pub fn publish_to_appointment(&self, appointment_id: Uuid, event: BusEvent) {
        let label = event.label();
        self.metrics.published_total.add(1, &[KeyValue::new("event", label)]);

        if let Some(tx) = self.appointments.get(&appointment_id) {
            tracing::trace!(%appointment_id, event = label, "Published to appointment channel");
            let _ = tx.send(event);
        } else {
            self.metrics.unrouted_total.add(1, &[KeyValue::new("event", label)]);
        }
    }

    pub fn publish_to_user(&self, user_id: Uuid, event: BusEvent) {
        let label = event.label();
        self.metrics.published_total.add(1, &[KeyValue::new("event", label)]);

        if let Some(tx) = self.users.get(&user_id) {
            tracing::trace!(%user_id, event = label, "Published to user feed");
            let _ = tx.send(event);
        } else {
            self.metrics.unrouted_total.add(1, &[KeyValue::new("event", label)]);
        }
    }

    pub fn publish_presence(&self, update: PresenceUpdate) {
        self.metrics.published_total.add(1, &[KeyValue::new("event", "presence")]);
        let _ = self.presence_tx.send(update);
    }

    /// Announces an appointment change to both parties, the appointment
    /// channel and the admin feed.
    pub fn announce_appointment(&self, appointment: Arc<Appointment>) {
        let event = BusEvent::AppointmentUpdated(Arc::clone(&appointment));
        self.publish_to_user(appointment.requester_id, event.clone());
        self.publish_to_user(appointment.responder_id, event.clone());
        self.publish_to_appointment(appointment.id, event.clone());
        let _ = self.admin_tx.send(event);
    }

    /// Performs a garbage collection cycle to reclaim channels with no receivers.
    pub fn perform_gc(&self) {
        let start = std::time::Instant::now();
        let mut reclaimed: u64 = 0;

        for map in [&self.appointments, &self.users] {
            map.retain(|_, sender| {
                let active = sender.receiver_count() > 0;
                if !active {
                    self.metrics.active_channels.add(-1, &[]);
                    reclaimed += 1;
                }
                active
            });
        }

        let duration = start.elapsed().as_secs_f64();
        self.metrics.gc_duration_seconds.record(duration, &[]);

        if reclaimed > 0 {
            self.metrics.gc_reclaimed_total.add(reclaimed, &[]);
            tracing::info!(reclaimed, "Event channel GC reclaimed stale channels");
        }
        tracing::debug!(duration_secs = %duration, "Event channel GC cycle completed");
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.appointments.len() + self.users.len()
    }
}
