use crate::domain::appointment::Appointment;
use crate::domain::message::Message;
use crate::domain::presence::PresenceUpdate;
use crate::domain::receipt::DeliveryStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptUpdate {
    pub appointment_id: Uuid,
    pub reader_id: Uuid,
    pub message_ids: Vec<Uuid>,
    pub status: DeliveryStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Internal events fanned out by the event bus. Records are shared, not cloned,
/// and rendered per viewer at the edge.
#[derive(Debug, Clone)]
pub enum BusEvent {
    AppointmentUpdated(Arc<Appointment>),
    MessageCreated(Arc<Message>),
    MessageUpdated(Arc<Message>),
    MessageHidden { appointment_id: Uuid, message_id: Uuid },
    ReceiptUpdated(ReceiptUpdate),
    Typing { appointment_id: Uuid, user_id: Uuid, expires_at: OffsetDateTime },
    ChatLockChanged { appointment_id: Uuid, locked: bool, changed_by: Uuid },
    ChatReset { appointment_id: Uuid, reset_by: Uuid },
    Presence(PresenceUpdate),
    /// Tells every session of the receiving user to close.
    Disconnect,
}

impl BusEvent {
    #[must_use]
    pub fn appointment_id(&self) -> Option<Uuid> {
        match self {
            Self::AppointmentUpdated(appt) => Some(appt.id),
            Self::MessageCreated(msg) | Self::MessageUpdated(msg) => Some(msg.appointment_id),
            Self::MessageHidden { appointment_id, .. }
            | Self::Typing { appointment_id, .. }
            | Self::ChatLockChanged { appointment_id, .. }
            | Self::ChatReset { appointment_id, .. } => Some(*appointment_id),
            Self::ReceiptUpdated(update) => Some(update.appointment_id),
            Self::Presence(_) | Self::Disconnect => None,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AppointmentUpdated(_) => "appointment_updated",
            Self::MessageCreated(_) => "message_created",
            Self::MessageUpdated(_) => "message_updated",
            Self::MessageHidden { .. } => "message_hidden",
            Self::ReceiptUpdated(_) => "receipt_updated",
            Self::Typing { .. } => "typing",
            Self::ChatLockChanged { .. } => "chat_lock_changed",
            Self::ChatReset { .. } => "chat_reset",
            Self::Presence(_) => "presence",
            Self::Disconnect => "disconnect",
        }
    }
}
