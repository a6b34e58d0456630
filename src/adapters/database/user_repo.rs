use crate::adapters::database::records::UserRecord;
use crate::adapters::database::{DbPool, is_unique_violation};
use crate::domain::user::User;
use crate::error::{AppError, Result};
use crate::storage::UserRepository;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgUserRepository {
    pool: DbPool,
}

impl PgUserRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[tracing::instrument(level = "debug", skip(self, user), fields(user.id = %user.id))]
    async fn create(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r"
            INSERT INTO users (id, username, password_hash, is_admin, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AppError::Conflict("Username already exists".into())),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, password_hash, is_admin, created_at, deleted_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, password_hash, is_admin, created_at, deleted_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn soft_delete(&self, id: Uuid, at: OffsetDateTime) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(level = "debug", skip(self, user), fields(username = %user.username))]
    async fn upsert_admin(&self, user: &User) -> Result<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            r"
            INSERT INTO users (id, username, password_hash, is_admin, created_at)
            VALUES ($1, $2, $3, TRUE, $4)
            ON CONFLICT (username)
            DO UPDATE SET is_admin = TRUE, password_hash = EXCLUDED.password_hash, deleted_at = NULL
            RETURNING id, username, password_hash, is_admin, created_at, deleted_at
            ",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into())
    }
}
