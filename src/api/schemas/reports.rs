use crate::domain::report::{Report, ReportReason};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub reason: ReportReason,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportAccepted {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub appointment_id: Uuid,
    pub message_id: Option<Uuid>,
    pub reason: ReportReason,
    pub details: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Report> for ReportResponse {
    fn from(report: Report) -> Self {
        Self {
            id: report.id,
            reporter_id: report.reporter_id,
            appointment_id: report.appointment_id,
            message_id: report.message_id,
            reason: report.reason,
            details: report.details,
            created_at: report.created_at,
        }
    }
}
