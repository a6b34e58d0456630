//! JSON frames exchanged over the gateway WebSocket.
//!
//! Every frame is adjacently tagged: `{"type": "subscribe", "data": {...}}`.

use crate::domain::appointment::AppointmentView;
use crate::domain::event::ReceiptUpdate;
use crate::domain::message::MessageView;
use crate::domain::presence::PresenceUpdate;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Subscribe { appointment_id: Uuid },
    Unsubscribe { appointment_id: Uuid },
    Delivered { appointment_id: Uuid, message_ids: Vec<Uuid> },
    Typing { appointment_id: Uuid },
    Heartbeat,
    CloseChat { appointment_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Ready {
        user_id: Uuid,
        session_id: Uuid,
    },
    Subscribed {
        appointment_id: Uuid,
    },
    Unsubscribed {
        appointment_id: Uuid,
    },
    AppointmentUpdated(Box<AppointmentView>),
    MessageCreated(Box<MessageView>),
    MessageUpdated(Box<MessageView>),
    MessageHidden {
        appointment_id: Uuid,
        message_id: Uuid,
    },
    ReceiptUpdated(ReceiptUpdate),
    PresenceChanged(PresenceUpdate),
    Typing {
        appointment_id: Uuid,
        user_id: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        expires_at: OffsetDateTime,
    },
    ChatLockChanged {
        appointment_id: Uuid,
        locked: bool,
        changed_by: Uuid,
    },
    ChatReset {
        appointment_id: Uuid,
        reset_by: Uuid,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        appointment_id: Option<Uuid>,
    },
}

impl ServerFrame {
    #[must_use]
    pub fn error(err: &crate::error::AppError, appointment_id: Option<Uuid>) -> Self {
        Self::Error { code: err.code().to_string(), message: err.to_string(), appointment_id }
    }
}
