use crate::config::ChatConfig;
use crate::domain::appointment::{ActorRole, Appointment, AppointmentStatus};
use crate::domain::event::BusEvent;
use crate::domain::message::{DeleteScope, Message, MessageView, NewMessage, PinDuration};
use crate::domain::user::Actor;
use crate::error::{AppError, Result};
use crate::services::access_gate::AccessGate;
use crate::services::appointment_service::AppointmentService;
use crate::services::event_bus::EventBus;
use crate::storage::MessageRepository;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    duplicate_sends_total: Counter<u64>,
    mutations_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            sent_total: meter
                .u64_counter("rendezvous_messages_sent_total")
                .with_description("Total messages accepted")
                .build(),
            duplicate_sends_total: meter
                .u64_counter("rendezvous_messages_duplicate_total")
                .with_description("Sends absorbed because the client message id was already used")
                .build(),
            mutations_total: meter
                .u64_counter("rendezvous_message_mutations_total")
                .with_description("Edits, deletions, stars and pins by kind")
                .build(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub body: String,
    pub attachment_ref: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub client_message_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct MessageService {
    messages: Arc<dyn MessageRepository>,
    appointments: AppointmentService,
    gate: AccessGate,
    bus: EventBus,
    max_message_length: usize,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(
        config: &ChatConfig,
        messages: Arc<dyn MessageRepository>,
        appointments: AppointmentService,
        gate: AccessGate,
        bus: EventBus,
    ) -> Self {
        Self {
            messages,
            appointments,
            gate,
            bus,
            max_message_length: config.max_message_length,
            metrics: Metrics::new(),
        }
    }

    /// Loads the appointment and passes it through visibility and the chat lock.
    pub(crate) async fn open_chat(&self, actor: &Actor, appointment_id: Uuid) -> Result<(Appointment, ActorRole)> {
        let (appointment, role) = self.appointments.authorize(actor, appointment_id).await?;
        self.gate.check(actor, &appointment)?;
        Ok((appointment, role))
    }

    fn ensure_writable(appointment: &Appointment) -> Result<()> {
        if appointment.is_chat_writable(OffsetDateTime::now_utc()) {
            return Ok(());
        }
        let reason = if appointment.status == AppointmentStatus::DeletedByAdmin {
            "appointment was deleted by an administrator"
        } else {
            "appointment date has passed"
        };
        Err(AppError::ChatUnavailable(reason.into()))
    }

    fn validate_body(&self, body: &str, has_attachment: bool) -> Result<()> {
        if body.trim().is_empty() && !has_attachment {
            return Err(AppError::BadRequest("Message cannot be empty".into()));
        }
        if body.chars().count() > self.max_message_length {
            return Err(AppError::BadRequest(format!(
                "Message exceeds the maximum length of {} characters",
                self.max_message_length
            )));
        }
        Ok(())
    }

    /// Loads a message the actor can see, with its appointment and the actor's role.
    async fn open_message(&self, actor: &Actor, message_id: Uuid) -> Result<(Message, Appointment, ActorRole)> {
        let message = self.messages.find(message_id).await?.ok_or(AppError::NotFound)?;
        let (appointment, role) = self.open_chat(actor, message.appointment_id).await?;
        if !message.is_visible_to(actor.user_id, appointment.chat_cleared_at(actor.user_id)) {
            return Err(AppError::NotFound);
        }
        Ok((message, appointment, role))
    }

    fn record(&self, kind: &'static str) {
        self.metrics.mutations_total.add(1, &[KeyValue::new("kind", kind)]);
    }

    /// Stores a message and broadcasts it. Re-sending a `client_message_id`
    /// returns the stored message and broadcasts nothing.
    #[tracing::instrument(
        skip(self, actor, req),
        fields(user_id = %actor.user_id, message_id = tracing::field::Empty),
        err(level = "warn")
    )]
    pub async fn send(&self, actor: &Actor, appointment_id: Uuid, req: SendMessage) -> Result<Message> {
        let (appointment, role) = self.open_chat(actor, appointment_id).await?;
        Self::ensure_writable(&appointment)?;
        self.validate_body(&req.body, req.attachment_ref.is_some())?;

        let message = Message::new(
            NewMessage {
                appointment_id,
                sender_id: actor.user_id,
                sender_role: role,
                body: req.body,
                attachment_ref: req.attachment_ref,
                reply_to_id: req.reply_to_id,
                client_message_id: req.client_message_id,
            },
            OffsetDateTime::now_utc(),
        );
        let (stored, inserted) = self.messages.create(&message).await?;
        tracing::Span::current().record("message_id", tracing::field::display(stored.id));

        if inserted {
            self.metrics.sent_total.add(1, &[KeyValue::new("role", role.as_str())]);
            self.bus.publish_to_appointment(appointment_id, BusEvent::MessageCreated(Arc::new(stored.clone())));
        } else {
            tracing::debug!("Duplicate send absorbed");
            self.metrics.duplicate_sends_total.add(1, &[]);
        }
        Ok(stored)
    }

    /// The caller's history, oldest first.
    #[tracing::instrument(level = "debug", skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn list(&self, actor: &Actor, appointment_id: Uuid) -> Result<Vec<MessageView>> {
        let (appointment, _) = self.open_chat(actor, appointment_id).await?;
        let watermark = appointment.chat_cleared_at(actor.user_id);
        let now = OffsetDateTime::now_utc();

        Ok(self
            .messages
            .list_for_appointment(appointment_id)
            .await?
            .iter()
            .filter(|m| m.is_visible_to(actor.user_id, watermark))
            .map(|m| m.view_for(actor, now))
            .collect())
    }

    #[tracing::instrument(skip(self, actor, body), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn edit(&self, actor: &Actor, message_id: Uuid, body: String) -> Result<Message> {
        let (mut message, appointment, _) = self.open_message(actor, message_id).await?;
        Self::ensure_writable(&appointment)?;
        self.validate_body(&body, message.attachment_ref.is_some())?;

        let now = OffsetDateTime::now_utc();
        if message.apply_edit(actor.user_id, body, now)? {
            message = self
                .messages
                .update_body(message_id, &message.body, now)
                .await?
                .ok_or_else(|| AppError::Conflict("message has been deleted".into()))?;
            self.record("edit");
            self.bus
                .publish_to_appointment(message.appointment_id, BusEvent::MessageUpdated(Arc::new(message.clone())));
        }
        Ok(message)
    }

    /// `ForEveryone` tombstones the message for all viewers; `ForMe` hides it
    /// from the caller's history and tells only the caller's sessions.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn delete(&self, actor: &Actor, message_id: Uuid, scope: DeleteScope) -> Result<()> {
        let (mut message, appointment, _) = self.open_message(actor, message_id).await?;

        match scope {
            DeleteScope::ForEveryone => {
                if !actor.is_admin {
                    Self::ensure_writable(&appointment)?;
                }
                let now = OffsetDateTime::now_utc();
                if message.apply_delete_for_everyone(actor, now)?
                    && let Some(stored) = self.messages.tombstone(message_id, actor.user_id, now).await?
                {
                    self.record("delete_for_everyone");
                    self.bus.publish_to_appointment(stored.appointment_id, BusEvent::MessageUpdated(Arc::new(stored)));
                }
            }
            DeleteScope::ForMe => {
                if self.messages.add_removed_for(message_id, actor.user_id).await? {
                    self.record("delete_for_me");
                    self.bus.publish_to_user(
                        actor.user_id,
                        BusEvent::MessageHidden { appointment_id: message.appointment_id, message_id },
                    );
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn star(&self, actor: &Actor, message_id: Uuid, on: bool) -> Result<Message> {
        let (mut message, _, _) = self.open_message(actor, message_id).await?;

        if self.messages.set_starred(message_id, actor.user_id, on).await? {
            message.apply_star(actor.user_id, on);
            self.record("star");
            self.bus.publish_to_user(actor.user_id, BusEvent::MessageUpdated(Arc::new(message.clone())));
        }
        Ok(message)
    }

    /// Pins for `duration`, or unpins when `None`. The pin is shared by the appointment.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn pin(&self, actor: &Actor, message_id: Uuid, duration: Option<PinDuration>) -> Result<Message> {
        let (mut message, appointment, _) = self.open_message(actor, message_id).await?;
        Self::ensure_writable(&appointment)?;

        if message.apply_pin(actor.user_id, duration, OffsetDateTime::now_utc())? {
            if !self.messages.set_pin(message_id, message.pin).await? {
                return Err(AppError::Conflict("deleted messages cannot be pinned".into()));
            }
            self.record(if duration.is_some() { "pin" } else { "unpin" });
            self.bus
                .publish_to_appointment(message.appointment_id, BusEvent::MessageUpdated(Arc::new(message.clone())));
        }
        Ok(message)
    }

    /// Messages whose pin has not expired yet, as seen by the caller.
    pub async fn active_pins(&self, actor: &Actor, appointment_id: Uuid) -> Result<Vec<MessageView>> {
        let mut views = self.list(actor, appointment_id).await?;
        views.retain(|v| v.pin.is_some());
        Ok(views)
    }

    /// Hides everything sent so far from the caller's own history.
    pub async fn clear_chat(&self, actor: &Actor, appointment_id: Uuid) -> Result<OffsetDateTime> {
        self.appointments.clear_chat(actor, appointment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventBusConfig;
    use crate::domain::appointment::{NewAppointment, Schedule};
    use crate::domain::user::User;
    use crate::storage::Storage;

    struct Fixture {
        service: MessageService,
        gate: AccessGate,
        bus: EventBus,
        messages: Arc<dyn MessageRepository>,
        requester: Actor,
        responder: Actor,
        appointment_id: Uuid,
    }

    async fn fixture_at(at: OffsetDateTime) -> Fixture {
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
        let config = ChatConfig::default();
        let gate = AccessGate::new(&config, appointments.clone(), bus.clone());
        let service = MessageService::new(&config, Arc::clone(&storage.messages), appointments, gate.clone(), bus.clone());
        Fixture {
            service,
            gate,
            bus,
            messages: Arc::clone(&storage.messages),
            requester: Actor::user(ids[0]),
            responder: Actor::user(ids[1]),
            appointment_id: appointment.id,
        }
    }

    async fn fixture() -> Fixture {
        fixture_at(OffsetDateTime::now_utc() + time::Duration::days(2)).await
    }

    fn text(body: &str) -> SendMessage {
        SendMessage { body: body.into(), ..SendMessage::default() }
    }

    #[tokio::test]
    async fn test_send_is_idempotent_per_client_id() {
        let f = fixture().await;
        let mut sub = f.bus.subscribe(f.appointment_id, Uuid::new_v4()).unwrap();
        let req = SendMessage { client_message_id: Some(Uuid::new_v4()), ..text("hello") };

        let first = f.service.send(&f.requester, f.appointment_id, req.clone()).await.unwrap();
        let second = f.service.send(&f.requester, f.appointment_id, req).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(matches!(sub.recv().await.unwrap(), BusEvent::MessageCreated(m) if m.id == first.id));
        assert_eq!(f.service.list(&f.responder, f.appointment_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_validates_body() {
        let f = fixture().await;
        let empty = f.service.send(&f.requester, f.appointment_id, text("   ")).await;
        assert!(matches!(empty, Err(AppError::BadRequest(_))));

        let long = "x".repeat(ChatConfig::default().max_message_length + 1);
        let too_long = f.service.send(&f.requester, f.appointment_id, text(&long)).await;
        assert!(matches!(too_long, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_outdated_chat_is_read_only() {
        let f = fixture_at(OffsetDateTime::now_utc() - time::Duration::hours(1)).await;
        let err = f.service.send(&f.requester, f.appointment_id, text("late")).await.unwrap_err();
        assert!(matches!(err, AppError::ChatUnavailable(_)));
        assert!(f.service.list(&f.requester, f.appointment_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_for_everyone_leaves_tombstone() {
        let f = fixture().await;
        let msg = f.service.send(&f.requester, f.appointment_id, text("oops")).await.unwrap();
        f.service.pin(&f.responder, msg.id, Some(PinDuration::Hours24)).await.unwrap();

        let denied = f.service.delete(&f.responder, msg.id, DeleteScope::ForEveryone).await;
        assert!(matches!(denied, Err(AppError::Unauthorized(_))));

        f.service.delete(&f.requester, msg.id, DeleteScope::ForEveryone).await.unwrap();

        let views = f.service.list(&f.responder, f.appointment_id).await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].deleted);
        assert_eq!(views[0].body, None);
        assert_eq!(views[0].preserved_original_body, None);
        assert!(views[0].pin.is_none());

        let admin_view = f.service.list(&Actor::admin(Uuid::new_v4()), f.appointment_id).await.unwrap();
        assert_eq!(admin_view[0].preserved_original_body.as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn test_stale_edit_cannot_undo_delete_for_everyone() {
        let f = fixture().await;
        let msg = f.service.send(&f.requester, f.appointment_id, text("original")).await.unwrap();

        // The editor read the message before the pin and the admin delete landed.
        let mut stale = f.messages.find(msg.id).await.unwrap().unwrap();
        f.service.pin(&f.responder, msg.id, Some(PinDuration::Days7)).await.unwrap();
        f.service.delete(&Actor::admin(Uuid::new_v4()), msg.id, DeleteScope::ForEveryone).await.unwrap();

        let now = OffsetDateTime::now_utc();
        assert!(stale.apply_edit(f.requester.user_id, "edited".into(), now).unwrap());
        assert!(f.messages.update_body(msg.id, &stale.body, now).await.unwrap().is_none());

        let stored = f.messages.find(msg.id).await.unwrap().unwrap();
        assert!(stored.deleted);
        assert!(!stored.edited);
        assert_eq!(stored.preserved_original_body.as_deref(), Some("original"));
        assert!(stored.pin.is_none());

        let err = f.service.edit(&f.requester, msg.id, "again".into()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = f.service.pin(&f.responder, msg.id, Some(PinDuration::Hours24)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_edit_keeps_concurrent_pin() {
        let f = fixture().await;
        let msg = f.service.send(&f.requester, f.appointment_id, text("Gate code 4411")).await.unwrap();
        f.service.pin(&f.responder, msg.id, Some(PinDuration::Hours24)).await.unwrap();

        let edited = f.service.edit(&f.requester, msg.id, "Gate code 4412".into()).await.unwrap();
        assert!(edited.edited);
        assert_eq!(edited.pin.map(|p| p.by), Some(f.responder.user_id));

        let stored = f.messages.find(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.body, "Gate code 4412");
        assert!(stored.pin.is_some());
    }

    #[tokio::test]
    async fn test_delete_for_me_only_hides_for_caller() {
        let f = fixture().await;
        let msg = f.service.send(&f.requester, f.appointment_id, text("hi")).await.unwrap();
        let mut feed = f.bus.subscribe_user(f.responder.user_id);

        f.service.delete(&f.responder, msg.id, DeleteScope::ForMe).await.unwrap();

        assert!(matches!(feed.recv().await.unwrap(), BusEvent::MessageHidden { message_id, .. } if message_id == msg.id));
        assert!(f.service.list(&f.responder, f.appointment_id).await.unwrap().is_empty());
        assert_eq!(f.service.list(&f.requester, f.appointment_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_only_by_sender() {
        let f = fixture().await;
        let msg = f.service.send(&f.requester, f.appointment_id, text("draft")).await.unwrap();

        let denied = f.service.edit(&f.responder, msg.id, "hijack".into()).await;
        assert!(matches!(denied, Err(AppError::Unauthorized(_))));

        let edited = f.service.edit(&f.requester, msg.id, "final".into()).await.unwrap();
        assert!(edited.edited);
        assert_eq!(edited.body, "final");
    }

    #[tokio::test]
    async fn test_star_is_per_user() {
        let f = fixture().await;
        let msg = f.service.send(&f.requester, f.appointment_id, text("remember")).await.unwrap();
        f.service.star(&f.responder, msg.id, true).await.unwrap();

        assert!(f.service.list(&f.responder, f.appointment_id).await.unwrap()[0].starred);
        assert!(!f.service.list(&f.requester, f.appointment_id).await.unwrap()[0].starred);
    }

    #[tokio::test]
    async fn test_clear_chat_hides_older_messages() {
        let f = fixture().await;
        f.service.send(&f.requester, f.appointment_id, text("before")).await.unwrap();
        f.service.clear_chat(&f.responder, f.appointment_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        f.service.send(&f.requester, f.appointment_id, text("after")).await.unwrap();

        let views = f.service.list(&f.responder, f.appointment_id).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].body.as_deref(), Some("after"));
        assert_eq!(f.service.list(&f.requester, f.appointment_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_locked_chat_refuses_counterparty() {
        let f = fixture().await;
        f.gate.lock(&f.requester, f.appointment_id, "hunter22".into()).await.unwrap();

        let err = f.service.list(&f.responder, f.appointment_id).await.unwrap_err();
        assert!(matches!(err, AppError::ChatLocked));
        assert!(f.service.send(&f.requester, f.appointment_id, text("mine")).await.is_ok());
    }
}
