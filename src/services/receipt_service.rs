use crate::domain::appointment::ActorRole;
use crate::domain::event::{BusEvent, ReceiptUpdate};
use crate::domain::receipt::DeliveryStatus;
use crate::domain::user::Actor;
use crate::error::Result;
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
    receipts_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            receipts_total: meter
                .u64_counter("rendezvous_receipts_total")
                .with_description("Messages promoted to delivered or read")
                .build(),
        }
    }
}

/// Delivered and read receipts. Both operations are idempotent and announce
/// a single `ReceiptUpdated` only when at least one message changed.
#[derive(Clone, Debug)]
pub struct ReceiptService {
    messages: Arc<dyn MessageRepository>,
    appointments: AppointmentService,
    gate: AccessGate,
    bus: EventBus,
    metrics: Metrics,
}

impl ReceiptService {
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        appointments: AppointmentService,
        gate: AccessGate,
        bus: EventBus,
    ) -> Self {
        Self { messages, appointments, gate, bus, metrics: Metrics::new() }
    }

    /// Admins reading along leave no receipts.
    async fn reader_role(&self, actor: &Actor, appointment_id: Uuid) -> Result<ActorRole> {
        let (appointment, role) = self.appointments.authorize(actor, appointment_id).await?;
        self.gate.check(actor, &appointment)?;
        Ok(role)
    }

    fn announce(&self, appointment_id: Uuid, reader_id: Uuid, message_ids: Vec<Uuid>, status: DeliveryStatus) {
        let label = if status == DeliveryStatus::Read { "read" } else { "delivered" };
        self.metrics.receipts_total.add(message_ids.len() as u64, &[KeyValue::new("status", label)]);
        self.bus.publish_to_appointment(
            appointment_id,
            BusEvent::ReceiptUpdated(ReceiptUpdate {
                appointment_id,
                reader_id,
                message_ids,
                status,
                at: OffsetDateTime::now_utc(),
            }),
        );
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, actor, message_ids),
        fields(user_id = %actor.user_id, count = message_ids.len()),
        err(level = "warn")
    )]
    pub async fn mark_delivered(&self, actor: &Actor, appointment_id: Uuid, message_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if message_ids.is_empty() || self.reader_role(actor, appointment_id).await? == ActorRole::Admin {
            return Ok(Vec::new());
        }

        let changed = self.messages.mark_delivered(appointment_id, actor.user_id, message_ids).await?;
        if !changed.is_empty() {
            self.announce(appointment_id, actor.user_id, changed.clone(), DeliveryStatus::Delivered);
        }
        Ok(changed)
    }

    #[tracing::instrument(level = "debug", skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn mark_read(&self, actor: &Actor, appointment_id: Uuid) -> Result<Vec<Uuid>> {
        if self.reader_role(actor, appointment_id).await? == ActorRole::Admin {
            return Ok(Vec::new());
        }

        let changed = self.messages.mark_read(appointment_id, actor.user_id).await?;
        if !changed.is_empty() {
            tracing::debug!(count = changed.len(), "Messages marked read");
            self.announce(appointment_id, actor.user_id, changed.clone(), DeliveryStatus::Read);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChatConfig, EventBusConfig};
    use crate::domain::appointment::{Appointment, NewAppointment, Schedule};
    use crate::domain::message::{Message, NewMessage};
    use crate::storage::Storage;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_mark_read_is_idempotent_and_broadcasts_once() {
        let storage = Storage::in_memory();
        let bus = EventBus::new(&EventBusConfig::default());
        let requester = Uuid::new_v4();
        let responder = Uuid::new_v4();
        let at = OffsetDateTime::now_utc() + time::Duration::days(1);
        let appointment = Appointment::new(
            NewAppointment {
                requester_id: requester,
                responder_id: responder,
                listing_id: Uuid::new_v4(),
                schedule: Schedule { date: at.date(), time: at.time() },
                purpose: "Viewing".into(),
                message: None,
            },
            OffsetDateTime::now_utc(),
        );
        storage.appointments.insert(&appointment).await.unwrap();

        let mut ids = Vec::new();
        for sender in [requester, requester, responder] {
            let msg = Message::new(
                NewMessage {
                    appointment_id: appointment.id,
                    sender_id: sender,
                    sender_role: ActorRole::Requester,
                    body: "hi".into(),
                    attachment_ref: None,
                    reply_to_id: None,
                    client_message_id: None,
                },
                OffsetDateTime::now_utc(),
            );
            storage.messages.create(&msg).await.unwrap();
            ids.push(msg.id);
        }

        let appointments = AppointmentService::new(
            Arc::clone(&storage.appointments),
            Arc::clone(&storage.listings),
            Arc::clone(&storage.users),
            bus.clone(),
        );
        let gate = AccessGate::new(&ChatConfig::default(), appointments.clone(), bus.clone());
        let receipts = ReceiptService::new(Arc::clone(&storage.messages), appointments, gate, bus.clone());
        let mut sub = bus.subscribe(appointment.id, Uuid::new_v4()).unwrap();
        let reader = Actor::user(responder);

        let delivered = receipts.mark_delivered(&reader, appointment.id, &ids).await.unwrap();
        assert_eq!(delivered.len(), 2);

        let read = receipts.mark_read(&reader, appointment.id).await.unwrap();
        assert_eq!(read.len(), 2);
        assert!(!read.contains(&ids[2]));
        assert!(receipts.mark_read(&reader, appointment.id).await.unwrap().is_empty());

        let BusEvent::ReceiptUpdated(first) = sub.recv().await.unwrap() else { panic!("expected receipt") };
        assert_eq!(first.status, DeliveryStatus::Delivered);
        let BusEvent::ReceiptUpdated(second) = sub.recv().await.unwrap() else { panic!("expected receipt") };
        assert_eq!(second.status, DeliveryStatus::Read);
        assert!(sub.recv().now_or_never().is_none());
    }
}
