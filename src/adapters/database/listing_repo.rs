use crate::adapters::database::DbPool;
use crate::adapters::database::records::ListingRecord;
use crate::domain::user::Listing;
use crate::error::{AppError, Result};
use crate::storage::ListingRepository;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgListingRepository {
    pool: DbPool,
}

impl PgListingRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListingRepository for PgListingRepository {
    #[tracing::instrument(level = "debug", skip(self, listing), fields(listing.id = %listing.id))]
    async fn create(&self, listing: &Listing) -> Result<()> {
        let result = sqlx::query("INSERT INTO listings (id, owner_id, title, created_at) VALUES ($1, $2, $3, $4)")
            .bind(listing.id)
            .bind(listing.owner_id)
            .bind(&listing.title)
            .bind(listing.created_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            // Foreign key violation: owner does not exist
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23503") => Err(AppError::NotFound),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find(&self, id: Uuid) -> Result<Option<Listing>> {
        let record = sqlx::query_as::<_, ListingRecord>(
            "SELECT id, owner_id, title, created_at FROM listings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }
}
