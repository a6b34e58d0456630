use crate::config::ChatConfig;
use crate::domain::appointment::{ActorRole, Appointment, TransitionOutcome};
use crate::domain::chat_lock::ChatLock;
use crate::domain::event::BusEvent;
use crate::domain::user::Actor;
use crate::error::{AppError, Result};
use crate::services::appointment_service::{AppointmentService, Audience};
use crate::services::event_bus::EventBus;
use dashmap::DashSet;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    lock_events_total: Counter<u64>,
    denied_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            lock_events_total: meter
                .u64_counter("rendezvous_chat_lock_events_total")
                .with_description("Chat lock operations by action")
                .build(),
            denied_total: meter
                .u64_counter("rendezvous_chat_lock_denied_total")
                .with_description("Chat accesses refused because the chat is locked")
                .build(),
        }
    }
}

/// Password gate in front of an appointment's chat.
///
/// Grants live only in memory, keyed by `(appointment, user)`. They are
/// dropped on `close_chat`, when the user's last gateway connection closes,
/// and for everyone when the lock is removed or reset.
#[derive(Clone, Debug)]
pub struct AccessGate {
    appointments: AppointmentService,
    bus: EventBus,
    grants: Arc<DashSet<(Uuid, Uuid)>>,
    min_password_length: usize,
    metrics: Metrics,
}

impl AccessGate {
    #[must_use]
    pub fn new(config: &ChatConfig, appointments: AppointmentService, bus: EventBus) -> Self {
        Self {
            appointments,
            bus,
            grants: Arc::new(DashSet::new()),
            min_password_length: config.min_lock_password_length,
            metrics: Metrics::new(),
        }
    }

    fn require_participant(role: ActorRole) -> Result<()> {
        if role == ActorRole::Admin {
            return Err(AppError::Unauthorized("only participants manage the chat lock".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_granted(&self, appointment_id: Uuid, user_id: Uuid) -> bool {
        self.grants.contains(&(appointment_id, user_id))
    }

    /// Admits the actor to the chat of `appointment`.
    ///
    /// # Errors
    /// Returns `AppError::ChatLocked` while locked and not unlocked by this user.
    pub fn check(&self, actor: &Actor, appointment: &Appointment) -> Result<()> {
        if actor.is_admin || appointment.chat_lock.is_none() || self.is_granted(appointment.id, actor.user_id) {
            return Ok(());
        }
        self.metrics.denied_total.add(1, &[]);
        Err(AppError::ChatLocked)
    }

    fn record(&self, action: &'static str) {
        self.metrics.lock_events_total.add(1, &[KeyValue::new("action", action)]);
    }

    #[tracing::instrument(skip(self, actor, password), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn lock(&self, actor: &Actor, appointment_id: Uuid, password: String) -> Result<()> {
        let (_, role) = self.appointments.authorize(actor, appointment_id).await?;
        Self::require_participant(role)?;

        let lock = ChatLock::create(password, actor.user_id, OffsetDateTime::now_utc(), self.min_password_length).await?;
        self.appointments
            .mutate(actor, appointment_id, Audience::Everyone, |appointment, _, _| {
                if appointment.chat_lock.is_some() {
                    return Err(AppError::Conflict("chat is already locked".into()));
                }
                appointment.chat_lock = Some(lock.clone());
                Ok(TransitionOutcome::Changed)
            })
            .await?;

        self.grants.insert((appointment_id, actor.user_id));
        self.bus.publish_to_appointment(
            appointment_id,
            BusEvent::ChatLockChanged { appointment_id, locked: true, changed_by: actor.user_id },
        );
        tracing::info!("Chat locked");
        self.record("lock");
        Ok(())
    }

    /// Grants this user session access after checking the password.
    #[tracing::instrument(skip(self, actor, password), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn unlock(&self, actor: &Actor, appointment_id: Uuid, password: String) -> Result<()> {
        let (appointment, role) = self.appointments.authorize(actor, appointment_id).await?;
        Self::require_participant(role)?;

        let Some(lock) = appointment.chat_lock else {
            return Err(AppError::Conflict("chat is not locked".into()));
        };
        lock.verify(password).await?;

        self.grants.insert((appointment_id, actor.user_id));
        self.record("unlock");
        Ok(())
    }

    /// Clears the lock for good. Requires the current password.
    #[tracing::instrument(skip(self, actor, password), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn remove_lock(&self, actor: &Actor, appointment_id: Uuid, password: String) -> Result<()> {
        let (appointment, role) = self.appointments.authorize(actor, appointment_id).await?;
        Self::require_participant(role)?;

        let Some(verified) = appointment.chat_lock else {
            return Err(AppError::Conflict("chat is not locked".into()));
        };
        verified.verify(password).await?;

        self.appointments
            .mutate(actor, appointment_id, Audience::Everyone, |appointment, _, _| {
                match &appointment.chat_lock {
                    Some(current) if *current == verified => {
                        appointment.chat_lock = None;
                        Ok(TransitionOutcome::Changed)
                    }
                    Some(_) => Err(AppError::Conflict("chat lock changed, try again".into())),
                    None => Ok(TransitionOutcome::Unchanged),
                }
            })
            .await?;

        self.revoke_appointment(appointment_id);
        self.bus.publish_to_appointment(
            appointment_id,
            BusEvent::ChatLockChanged { appointment_id, locked: false, changed_by: actor.user_id },
        );
        tracing::info!("Chat lock removed");
        self.record("remove");
        Ok(())
    }

    /// Drops the lock without the password by purging every message of the
    /// appointment in the same write.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn forgot_password(&self, actor: &Actor, appointment_id: Uuid, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(AppError::BadRequest("Resetting the chat deletes all messages and must be confirmed".into()));
        }
        let (appointment, role) = self.appointments.authorize(actor, appointment_id).await?;
        Self::require_participant(role)?;
        if appointment.chat_lock.is_none() {
            return Err(AppError::Conflict("chat is not locked".into()));
        }

        let reset = self.appointments.reset_chat(actor, appointment_id).await?;

        self.revoke_appointment(appointment_id);
        self.bus.publish_to_appointment(appointment_id, BusEvent::ChatReset { appointment_id, reset_by: actor.user_id });
        self.appointments.publish(&reset, actor, Audience::Everyone);
        tracing::warn!("Chat reset after forgotten lock password");
        self.record("reset");
        Ok(())
    }

    pub fn close_chat(&self, appointment_id: Uuid, user_id: Uuid) {
        if self.grants.remove(&(appointment_id, user_id)).is_some() {
            tracing::debug!(%appointment_id, %user_id, "Chat access closed");
        }
    }

    /// Drops every grant held by `user_id`.
    pub fn revoke_user(&self, user_id: Uuid) {
        self.grants.retain(|(_, user)| *user != user_id);
    }

    fn revoke_appointment(&self, appointment_id: Uuid) {
        self.grants.retain(|(appointment, _)| *appointment != appointment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventBusConfig;
    use crate::domain::appointment::{NewAppointment, Schedule};
    use crate::domain::message::{Message, NewMessage};
    use crate::domain::user::User;
    use crate::storage::Storage;

    struct Fixture {
        gate: AccessGate,
        storage: Storage,
        requester: Actor,
        responder: Actor,
        appointment_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let storage = Storage::in_memory();
        let bus = EventBus::new(&EventBusConfig::default());
        let mut ids = Vec::new();
        for name in ["requester", "responder"] {
            let user = User {
                id: Uuid::new_v4(),
                username: name.into(),
                password_hash: String::new(),
                is_admin: false,
                created_at: OffsetDateTime::now_utc(),
                deleted_at: None,
            };
            storage.users.create(&user).await.unwrap();
            ids.push(user.id);
        }
        let at = OffsetDateTime::now_utc() + time::Duration::days(2);
        let appointment = Appointment::new(
            NewAppointment {
                requester_id: ids[0],
                responder_id: ids[1],
                listing_id: Uuid::new_v4(),
                schedule: Schedule { date: at.date(), time: at.time() },
                purpose: "Viewing".into(),
                message: None,
            },
            OffsetDateTime::now_utc(),
        );
        storage.appointments.insert(&appointment).await.unwrap();

        let appointments = AppointmentService::new(
            Arc::clone(&storage.appointments),
            Arc::clone(&storage.listings),
            Arc::clone(&storage.users),
            bus.clone(),
        );
        let gate = AccessGate::new(&ChatConfig::default(), appointments, bus);
        Fixture {
            gate,
            storage,
            requester: Actor::user(ids[0]),
            responder: Actor::user(ids[1]),
            appointment_id: appointment.id,
        }
    }

    async fn appointment(f: &Fixture) -> Appointment {
        f.storage.appointments.find(f.appointment_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_lock_gates_counterparty_until_unlock() {
        let f = fixture().await;
        f.gate.lock(&f.requester, f.appointment_id, "hunter22".into()).await.unwrap();

        let locked = appointment(&f).await;
        assert!(locked.chat_lock.as_ref().is_some_and(|l| l.password_hash != "hunter22"));
        assert!(f.gate.check(&f.requester, &locked).is_ok());
        assert!(matches!(f.gate.check(&f.responder, &locked), Err(AppError::ChatLocked)));
        assert!(f.gate.check(&Actor::admin(Uuid::new_v4()), &locked).is_ok());

        let wrong = f.gate.unlock(&f.responder, f.appointment_id, "nope".into()).await;
        assert!(matches!(wrong, Err(AppError::InvalidChatPassword)));

        f.gate.unlock(&f.responder, f.appointment_id, "hunter22".into()).await.unwrap();
        assert!(f.gate.check(&f.responder, &locked).is_ok());

        f.gate.close_chat(f.appointment_id, f.responder.user_id);
        assert!(matches!(f.gate.check(&f.responder, &locked), Err(AppError::ChatLocked)));
    }

    #[tokio::test]
    async fn test_double_lock_is_conflict() {
        let f = fixture().await;
        f.gate.lock(&f.requester, f.appointment_id, "hunter22".into()).await.unwrap();
        let again = f.gate.lock(&f.responder, f.appointment_id, "other-pass".into()).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_remove_lock_requires_password_and_clears_grants() {
        let f = fixture().await;
        f.gate.lock(&f.requester, f.appointment_id, "hunter22".into()).await.unwrap();

        let wrong = f.gate.remove_lock(&f.responder, f.appointment_id, "bad-pass".into()).await;
        assert!(matches!(wrong, Err(AppError::InvalidChatPassword)));

        f.gate.remove_lock(&f.responder, f.appointment_id, "hunter22".into()).await.unwrap();
        assert!(appointment(&f).await.chat_lock.is_none());
        assert!(!f.gate.is_granted(f.appointment_id, f.requester.user_id));
    }

    #[tokio::test]
    async fn test_forgot_password_purges_messages() {
        let f = fixture().await;
        let message = Message::new(
            NewMessage {
                appointment_id: f.appointment_id,
                sender_id: f.requester.user_id,
                sender_role: ActorRole::Requester,
                body: "secret".into(),
                attachment_ref: None,
                reply_to_id: None,
                client_message_id: None,
            },
            OffsetDateTime::now_utc(),
        );
        f.storage.messages.create(&message).await.unwrap();
        f.gate.lock(&f.requester, f.appointment_id, "hunter22".into()).await.unwrap();

        let unconfirmed = f.gate.forgot_password(&f.responder, f.appointment_id, false).await;
        assert!(matches!(unconfirmed, Err(AppError::BadRequest(_))));

        f.gate.forgot_password(&f.responder, f.appointment_id, true).await.unwrap();
        assert!(appointment(&f).await.chat_lock.is_none());
        assert!(f.storage.messages.list_for_appointment(f.appointment_id).await.unwrap().is_empty());
    }
}
