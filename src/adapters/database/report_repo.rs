use crate::adapters::database::DbPool;
use crate::adapters::database::records::ReportRecord;
use crate::domain::report::Report;
use crate::error::Result;
use crate::storage::ReportRepository;
use async_trait::async_trait;

#[derive(Clone, Debug)]
pub struct PgReportRepository {
    pool: DbPool,
}

impl PgReportRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportRepository for PgReportRepository {
    #[tracing::instrument(level = "debug", skip(self, report), fields(report.id = %report.id))]
    async fn create(&self, report: &Report) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO reports (id, reporter_id, appointment_id, message_id, reason, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(report.id)
        .bind(report.reporter_id)
        .bind(report.appointment_id)
        .bind(report.message_id)
        .bind(report.reason.as_str())
        .bind(&report.details)
        .bind(report.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self) -> Result<Vec<Report>> {
        let records = sqlx::query_as::<_, ReportRecord>(
            r"
            SELECT id, reporter_id, appointment_id, message_id, reason, details, created_at
            FROM reports
            ORDER BY created_at DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(TryInto::try_into).collect()
    }
}
