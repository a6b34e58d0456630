use crate::domain::user::Listing;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct ListingRecord {
    pub(crate) id: Uuid,
    pub(crate) owner_id: Uuid,
    pub(crate) title: String,
    pub(crate) created_at: OffsetDateTime,
}

impl From<ListingRecord> for Listing {
    fn from(record: ListingRecord) -> Self {
        Self { id: record.id, owner_id: record.owner_id, title: record.title, created_at: record.created_at }
    }
}
