use crate::domain::appointment::Appointment;
use crate::domain::chat_lock::ChatLock;
use crate::error::AppError;
use time::{Date, OffsetDateTime, Time};
use uuid::Uuid;

pub(crate) const APPOINTMENT_COLUMNS: &str = r"
    id, requester_id, responder_id, listing_id, scheduled_date, scheduled_time, purpose, message,
    status, cancel_reason, admin_reason, requester_reinitiation_count, responder_reinitiation_count,
    archived, archived_at, visible_to_requester, visible_to_responder,
    lock_password_hash, lock_locked_by, lock_locked_at,
    requester_chat_cleared_at, responder_chat_cleared_at, created_at, updated_at, version
";

#[derive(Debug, sqlx::FromRow)]
pub struct AppointmentRecord {
    pub(crate) id: Uuid,
    pub(crate) requester_id: Uuid,
    pub(crate) responder_id: Uuid,
    pub(crate) listing_id: Uuid,
    pub(crate) scheduled_date: Date,
    pub(crate) scheduled_time: Time,
    pub(crate) purpose: String,
    pub(crate) message: Option<String>,
    pub(crate) status: String,
    pub(crate) cancel_reason: Option<String>,
    pub(crate) admin_reason: Option<String>,
    pub(crate) requester_reinitiation_count: i16,
    pub(crate) responder_reinitiation_count: i16,
    pub(crate) archived: bool,
    pub(crate) archived_at: Option<OffsetDateTime>,
    pub(crate) visible_to_requester: bool,
    pub(crate) visible_to_responder: bool,
    pub(crate) lock_password_hash: Option<String>,
    pub(crate) lock_locked_by: Option<Uuid>,
    pub(crate) lock_locked_at: Option<OffsetDateTime>,
    pub(crate) requester_chat_cleared_at: Option<OffsetDateTime>,
    pub(crate) responder_chat_cleared_at: Option<OffsetDateTime>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
    pub(crate) version: i64,
}

impl TryFrom<AppointmentRecord> for Appointment {
    type Error = AppError;

    fn try_from(record: AppointmentRecord) -> Result<Self, Self::Error> {
        let status = record.status.parse().map_err(|e: String| {
            tracing::error!(error = %e, appointment_id = %record.id, "Corrupt appointment status");
            AppError::Internal
        })?;

        let chat_lock = match (record.lock_password_hash, record.lock_locked_by, record.lock_locked_at) {
            (Some(password_hash), Some(locked_by), Some(locked_at)) => {
                Some(ChatLock { password_hash, locked_by, locked_at })
            }
            _ => None,
        };

        Ok(Self {
            id: record.id,
            requester_id: record.requester_id,
            responder_id: record.responder_id,
            listing_id: record.listing_id,
            date: record.scheduled_date,
            time: record.scheduled_time,
            purpose: record.purpose,
            message: record.message,
            status,
            cancel_reason: record.cancel_reason,
            admin_reason: record.admin_reason,
            requester_reinitiation_count: record.requester_reinitiation_count,
            responder_reinitiation_count: record.responder_reinitiation_count,
            archived: record.archived,
            archived_at: record.archived_at,
            visible_to_requester: record.visible_to_requester,
            visible_to_responder: record.visible_to_responder,
            chat_lock,
            requester_chat_cleared_at: record.requester_chat_cleared_at,
            responder_chat_cleared_at: record.responder_chat_cleared_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
            version: record.version,
        })
    }
}
