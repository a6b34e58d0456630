use crate::domain::user::Listing;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListingRequest {
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Listing> for ListingResponse {
    fn from(listing: Listing) -> Self {
        Self { id: listing.id, owner_id: listing.owner_id, title: listing.title, created_at: listing.created_at }
    }
}
