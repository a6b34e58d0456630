use crate::adapters::database::records::AppointmentRecord;
use crate::adapters::database::records::appointment::APPOINTMENT_COLUMNS;
use crate::adapters::database::{DbPool, is_unique_violation};
use crate::domain::appointment::Appointment;
use crate::error::{AppError, Result};
use crate::storage::AppointmentRepository;
use async_trait::async_trait;
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgAppointmentRepository {
    pool: DbPool,
}

impl PgAppointmentRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Versioned write shared by `update` and `reset_chat`.
    async fn write_versioned(conn: &mut PgConnection, appt: &Appointment) -> Result<Appointment> {
        let lock = appt.chat_lock.as_ref();
        let sql = format!(
            r"
            UPDATE appointments SET
                scheduled_date = $3, scheduled_time = $4, status = $5, cancel_reason = $6, admin_reason = $7,
                requester_reinitiation_count = $8, responder_reinitiation_count = $9,
                archived = $10, archived_at = $11, visible_to_requester = $12, visible_to_responder = $13,
                lock_password_hash = $14, lock_locked_by = $15, lock_locked_at = $16,
                requester_chat_cleared_at = $17, responder_chat_cleared_at = $18,
                updated_at = $19, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {APPOINTMENT_COLUMNS}
            "
        );

        let result = sqlx::query_as::<_, AppointmentRecord>(&sql)
            .bind(appt.id)
            .bind(appt.version)
            .bind(appt.date)
            .bind(appt.time)
            .bind(appt.status.as_str())
            .bind(&appt.cancel_reason)
            .bind(&appt.admin_reason)
            .bind(appt.requester_reinitiation_count)
            .bind(appt.responder_reinitiation_count)
            .bind(appt.archived)
            .bind(appt.archived_at)
            .bind(appt.visible_to_requester)
            .bind(appt.visible_to_responder)
            .bind(lock.map(|l| l.password_hash.clone()))
            .bind(lock.map(|l| l.locked_by))
            .bind(lock.map(|l| l.locked_at))
            .bind(appt.requester_chat_cleared_at)
            .bind(appt.responder_chat_cleared_at)
            .bind(appt.updated_at)
            .fetch_optional(conn)
            .await;

        match result {
            Ok(Some(record)) => record.try_into(),
            Ok(None) => Err(AppError::StaleVersion),
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateActive),
            Err(e) => Err(AppError::Database(e)),
        }
    }
}

#[async_trait]
impl AppointmentRepository for PgAppointmentRepository {
    #[tracing::instrument(level = "debug", skip(self, appt), fields(appointment.id = %appt.id))]
    async fn insert(&self, appt: &Appointment) -> Result<()> {
        let result = sqlx::query(
            r"
            INSERT INTO appointments (
                id, requester_id, responder_id, listing_id, scheduled_date, scheduled_time, purpose, message,
                status, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(appt.id)
        .bind(appt.requester_id)
        .bind(appt.responder_id)
        .bind(appt.listing_id)
        .bind(appt.date)
        .bind(appt.time)
        .bind(&appt.purpose)
        .bind(&appt.message)
        .bind(appt.status.as_str())
        .bind(appt.created_at)
        .bind(appt.updated_at)
        .bind(appt.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateActive),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find(&self, id: Uuid) -> Result<Option<Appointment>> {
        let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1");
        let record = sqlx::query_as::<_, AppointmentRecord>(&sql).bind(id).fetch_optional(&self.pool).await?;

        record.map(TryInto::try_into).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, appt), fields(appointment.id = %appt.id, version = appt.version))]
    async fn update(&self, appt: &Appointment) -> Result<Appointment> {
        let mut conn = self.pool.acquire().await?;
        Self::write_versioned(&mut conn, appt).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Appointment>> {
        let sql = format!(
            r"
            SELECT {APPOINTMENT_COLUMNS} FROM appointments
            WHERE requester_id = $1 OR responder_id = $1
            ORDER BY created_at DESC, id DESC
            "
        );
        let records = sqlx::query_as::<_, AppointmentRecord>(&sql).bind(user_id).fetch_all(&self.pool).await?;

        records.into_iter().map(TryInto::try_into).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_all(&self) -> Result<Vec<Appointment>> {
        let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments ORDER BY created_at DESC, id DESC");
        let records = sqlx::query_as::<_, AppointmentRecord>(&sql).fetch_all(&self.pool).await?;

        records.into_iter().map(TryInto::try_into).collect()
    }

    #[tracing::instrument(level = "debug", skip(self, appt), fields(appointment.id = %appt.id))]
    async fn reset_chat(&self, appt: &Appointment) -> Result<Appointment> {
        let mut tx = self.pool.begin().await?;

        let mut unlocked = appt.clone();
        unlocked.chat_lock = None;
        let saved = Self::write_versioned(&mut tx, &unlocked).await?;

        let purged = sqlx::query("DELETE FROM messages WHERE appointment_id = $1")
            .bind(appt.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        tracing::info!(purged, "Chat reset");
        Ok(saved)
    }
}
