use crate::domain::message::{Message, Pin, PinDuration};
use crate::domain::receipt::DeliveryStatus;
use crate::error::AppError;
use time::OffsetDateTime;
use uuid::Uuid;

pub(crate) const MESSAGE_COLUMNS: &str = r"
    id, client_message_id, appointment_id, sender_id, sender_role, body, attachment_ref, created_at,
    delivery_status, read_by, deleted, deleted_by, deleted_at, preserved_original_body, edited, edited_at,
    reply_to_id, starred_by, pin_by, pin_at, pin_expires_at, pin_duration_hours, removed_for
";

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRecord {
    pub(crate) id: Uuid,
    pub(crate) client_message_id: Option<Uuid>,
    pub(crate) appointment_id: Uuid,
    pub(crate) sender_id: Uuid,
    pub(crate) sender_role: String,
    pub(crate) body: String,
    pub(crate) attachment_ref: Option<String>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) delivery_status: i16,
    pub(crate) read_by: Vec<Uuid>,
    pub(crate) deleted: bool,
    pub(crate) deleted_by: Option<Uuid>,
    pub(crate) deleted_at: Option<OffsetDateTime>,
    pub(crate) preserved_original_body: Option<String>,
    pub(crate) edited: bool,
    pub(crate) edited_at: Option<OffsetDateTime>,
    pub(crate) reply_to_id: Option<Uuid>,
    pub(crate) starred_by: Vec<Uuid>,
    pub(crate) pin_by: Option<Uuid>,
    pub(crate) pin_at: Option<OffsetDateTime>,
    pub(crate) pin_expires_at: Option<OffsetDateTime>,
    pub(crate) pin_duration_hours: Option<i32>,
    pub(crate) removed_for: Vec<Uuid>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = AppError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let sender_role = record.sender_role.parse().map_err(|e: String| {
            tracing::error!(error = %e, message_id = %record.id, "Corrupt sender role");
            AppError::Internal
        })?;

        let pin = match (record.pin_by, record.pin_at, record.pin_expires_at, record.pin_duration_hours) {
            (Some(by), Some(at), Some(expires_at), Some(hours)) => Some(Pin {
                by,
                at,
                expires_at,
                duration: PinDuration::from_hours(u16::try_from(hours).map_err(|_| AppError::Internal)?),
            }),
            _ => None,
        };

        Ok(Self {
            id: record.id,
            client_message_id: record.client_message_id,
            appointment_id: record.appointment_id,
            sender_id: record.sender_id,
            sender_role,
            body: record.body,
            attachment_ref: record.attachment_ref,
            created_at: record.created_at,
            delivery_status: DeliveryStatus::from_i16(record.delivery_status),
            read_by: record.read_by,
            deleted: record.deleted,
            deleted_by: record.deleted_by,
            deleted_at: record.deleted_at,
            preserved_original_body: record.preserved_original_body,
            edited: record.edited,
            edited_at: record.edited_at,
            reply_to_id: record.reply_to_id,
            starred_by: record.starred_by,
            pin,
            removed_for: record.removed_for,
        })
    }
}
