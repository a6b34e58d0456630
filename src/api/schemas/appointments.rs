use crate::domain::appointment::{AppointmentStatus, Schedule, date_format, time_format};
use crate::error::{AppError, Result};
use crate::services::appointment_service::CreateAppointment;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Time};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    pub listing_id: Uuid,
    #[serde(with = "date_format")]
    pub date: Date,
    #[serde(with = "time_format")]
    pub time: Time,
    pub purpose: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<AppointmentRequest> for CreateAppointment {
    fn from(req: AppointmentRequest) -> Self {
        Self {
            listing_id: req.listing_id,
            schedule: Schedule { date: req.date, time: req.time },
            purpose: req.purpose,
            message: req.message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub target: AppointmentStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReinitiateRequest {
    #[serde(default, with = "date_format::option")]
    pub date: Option<Date>,
    #[serde(default, with = "time_format::option")]
    pub time: Option<Time>,
}

impl ReinitiateRequest {
    /// A reschedule needs both halves or neither.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` when only one of date and time is given.
    pub fn schedule(&self) -> Result<Option<Schedule>> {
        match (self.date, self.time) {
            (Some(date), Some(time)) => Ok(Some(Schedule { date, time })),
            (None, None) => Ok(None),
            _ => Err(AppError::BadRequest("Reschedule requires both date and time".into())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearChatResponse {
    #[serde(with = "time::serde::rfc3339")]
    pub cleared_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetLockRequest {
    #[serde(default)]
    pub confirm: bool,
}
