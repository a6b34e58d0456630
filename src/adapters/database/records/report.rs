use crate::domain::report::Report;
use crate::error::AppError;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct ReportRecord {
    pub(crate) id: Uuid,
    pub(crate) reporter_id: Uuid,
    pub(crate) appointment_id: Uuid,
    pub(crate) message_id: Option<Uuid>,
    pub(crate) reason: String,
    pub(crate) details: Option<String>,
    pub(crate) created_at: OffsetDateTime,
}

impl TryFrom<ReportRecord> for Report {
    type Error = AppError;

    fn try_from(record: ReportRecord) -> Result<Self, Self::Error> {
        let reason = record.reason.parse().map_err(|e: String| {
            tracing::error!(error = %e, report_id = %record.id, "Corrupt report reason");
            AppError::Internal
        })?;

        Ok(Self {
            id: record.id,
            reporter_id: record.reporter_id,
            appointment_id: record.appointment_id,
            message_id: record.message_id,
            reason,
            details: record.details,
            created_at: record.created_at,
        })
    }
}
