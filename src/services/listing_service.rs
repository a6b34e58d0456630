use crate::domain::user::Listing;
use crate::error::{AppError, Result};
use crate::storage::ListingRepository;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

const MAX_TITLE_LENGTH: usize = 200;

#[derive(Clone, Debug)]
pub struct ListingService {
    listings: Arc<dyn ListingRepository>,
}

impl ListingService {
    #[must_use]
    pub fn new(listings: Arc<dyn ListingRepository>) -> Self {
        Self { listings }
    }

    #[tracing::instrument(skip(self, title), err(level = "warn"))]
    pub async fn create(&self, owner_id: Uuid, title: String) -> Result<Listing> {
        let title = title.trim().to_string();
        if title.is_empty() || title.chars().count() > MAX_TITLE_LENGTH {
            return Err(AppError::BadRequest(format!("Title must be between 1 and {MAX_TITLE_LENGTH} characters")));
        }

        let listing = Listing { id: Uuid::now_v7(), owner_id, title, created_at: OffsetDateTime::now_utc() };
        self.listings.create(&listing).await?;
        tracing::debug!(listing_id = %listing.id, "Listing created");
        Ok(listing)
    }

    /// # Errors
    /// Returns `AppError::NotFound` if no listing has this id.
    pub async fn get(&self, id: Uuid) -> Result<Listing> {
        self.listings.find(id).await?.ok_or(AppError::NotFound)
    }
}
