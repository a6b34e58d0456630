use crate::adapters::database::DbPool;
use crate::adapters::database::records::MessageRecord;
use crate::adapters::database::records::message::MESSAGE_COLUMNS;
use crate::domain::message::{Message, Pin};
use crate::domain::receipt::DeliveryStatus;
use crate::error::{AppError, Result};
use crate::storage::MessageRepository;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Every write touches only the columns owned by the caller, so concurrent
/// edits of different fields never clobber each other.
#[derive(Clone, Debug)]
pub struct PgMessageRepository {
    pool: DbPool,
}

impl PgMessageRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    #[tracing::instrument(level = "debug", skip(self, msg), fields(message.id = %msg.id))]
    async fn create(&self, msg: &Message) -> Result<(Message, bool)> {
        let inserted = sqlx::query(
            r"
            INSERT INTO messages (
                id, client_message_id, appointment_id, sender_id, sender_role, body, attachment_ref,
                created_at, delivery_status, reply_to_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (sender_id, client_message_id) WHERE client_message_id IS NOT NULL DO NOTHING
            ",
        )
        .bind(msg.id)
        .bind(msg.client_message_id)
        .bind(msg.appointment_id)
        .bind(msg.sender_id)
        .bind(msg.sender_role.as_str())
        .bind(&msg.body)
        .bind(&msg.attachment_ref)
        .bind(msg.created_at)
        .bind(msg.delivery_status.as_i16())
        .bind(msg.reply_to_id)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            return Ok((msg.clone(), true));
        }

        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = $1 AND client_message_id = $2");
        let existing = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(msg.sender_id)
            .bind(msg.client_message_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::Internal)?;

        Ok((existing.try_into()?, false))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find(&self, id: Uuid) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let record = sqlx::query_as::<_, MessageRecord>(&sql).bind(id).fetch_optional(&self.pool).await?;

        record.map(TryInto::try_into).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Message>> {
        let sql = format!(
            r"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE appointment_id = $1
            ORDER BY created_at ASC, id ASC
            "
        );
        let records = sqlx::query_as::<_, MessageRecord>(&sql).bind(appointment_id).fetch_all(&self.pool).await?;

        records.into_iter().map(TryInto::try_into).collect()
    }

    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn update_body(&self, id: Uuid, body: &str, edited_at: OffsetDateTime) -> Result<Option<Message>> {
        let sql = format!(
            r"
            UPDATE messages SET body = $2, edited = TRUE, edited_at = $3
            WHERE id = $1 AND NOT deleted
            RETURNING {MESSAGE_COLUMNS}
            "
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(id)
            .bind(body)
            .bind(edited_at)
            .fetch_optional(&self.pool)
            .await?;

        record.map(TryInto::try_into).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn tombstone(&self, id: Uuid, deleted_by: Uuid, at: OffsetDateTime) -> Result<Option<Message>> {
        let sql = format!(
            r"
            UPDATE messages SET
                preserved_original_body = body, body = '',
                deleted = TRUE, deleted_by = $2, deleted_at = $3,
                pin_by = NULL, pin_at = NULL, pin_expires_at = NULL, pin_duration_hours = NULL
            WHERE id = $1 AND NOT deleted
            RETURNING {MESSAGE_COLUMNS}
            "
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(id)
            .bind(deleted_by)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        record.map(TryInto::try_into).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, pin))]
    async fn set_pin(&self, id: Uuid, pin: Option<Pin>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE messages SET pin_by = $2, pin_at = $3, pin_expires_at = $4, pin_duration_hours = $5
            WHERE id = $1 AND ($2::uuid IS NULL OR NOT deleted)
            ",
        )
        .bind(id)
        .bind(pin.map(|p| p.by))
        .bind(pin.map(|p| p.at))
        .bind(pin.map(|p| p.expires_at))
        .bind(pin.map(|p| i32::from(p.duration.hours())))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn add_removed_for(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE messages SET removed_for = array_append(removed_for, $2)
            WHERE id = $1 AND NOT ($2 = ANY(removed_for))
            ",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn set_starred(&self, id: Uuid, user_id: Uuid, starred: bool) -> Result<bool> {
        let sql = if starred {
            "UPDATE messages SET starred_by = array_append(starred_by, $2) WHERE id = $1 AND NOT ($2 = ANY(starred_by))"
        } else {
            "UPDATE messages SET starred_by = array_remove(starred_by, $2) WHERE id = $1 AND $2 = ANY(starred_by)"
        };
        let result = sqlx::query(sql).bind(id).bind(user_id).execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(batch.count = ids.len()))]
    async fn mark_delivered(&self, appointment_id: Uuid, reader: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let changed: Vec<(Uuid,)> = sqlx::query_as(
            r"
            UPDATE messages SET delivery_status = $4
            WHERE appointment_id = $1 AND id = ANY($3) AND sender_id <> $2 AND delivery_status = $5
            RETURNING id
            ",
        )
        .bind(appointment_id)
        .bind(reader)
        .bind(ids)
        .bind(DeliveryStatus::Delivered.as_i16())
        .bind(DeliveryStatus::Sent.as_i16())
        .fetch_all(&self.pool)
        .await?;

        Ok(changed.into_iter().map(|(id,)| id).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mark_read(&self, appointment_id: Uuid, reader: Uuid) -> Result<Vec<Uuid>> {
        let mut changed: Vec<(OffsetDateTime, Uuid)> = sqlx::query_as(
            r"
            UPDATE messages SET read_by = array_append(read_by, $2), delivery_status = $3
            WHERE appointment_id = $1 AND sender_id <> $2 AND NOT ($2 = ANY(read_by))
            RETURNING created_at, id
            ",
        )
        .bind(appointment_id)
        .bind(reader)
        .bind(DeliveryStatus::Read.as_i16())
        .fetch_all(&self.pool)
        .await?;

        changed.sort();
        Ok(changed.into_iter().map(|(_, id)| id).collect())
    }
}
