//! Repository seams. Services only see these traits; `adapters::database`
//! backs them with PostgreSQL and `adapters::memory` with process memory.

use crate::domain::appointment::Appointment;
use crate::domain::message::{Message, Pin};
use crate::domain::report::Report;
use crate::domain::user::{Listing, User};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send + Sync + Debug {
    /// # Errors
    /// `AppError::Conflict` if the username is taken.
    async fn create(&self, user: &User) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Marks the account deleted. Returns `false` if it was already gone.
    async fn soft_delete(&self, id: Uuid, at: OffsetDateTime) -> Result<bool>;

    /// Creates the account or promotes the existing one with the same username.
    async fn upsert_admin(&self, user: &User) -> Result<User>;
}

#[async_trait]
pub trait ListingRepository: Send + Sync + Debug {
    async fn create(&self, listing: &Listing) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Listing>>;
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync + Debug {
    /// # Errors
    /// `AppError::DuplicateActive` if the requester already has an active
    /// appointment on the same listing.
    async fn insert(&self, appointment: &Appointment) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Appointment>>;

    /// Writes `appointment` if the stored version still equals `appointment.version`
    /// and returns the stored record with its bumped version.
    ///
    /// # Errors
    /// `AppError::StaleVersion` on a stale version, `AppError::DuplicateActive` if the
    /// write would create a second active appointment.
    async fn update(&self, appointment: &Appointment) -> Result<Appointment>;

    /// Appointments where the user is requester or responder, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Appointment>>;

    async fn list_all(&self) -> Result<Vec<Appointment>>;

    /// Clears the chat lock and purges every message of the appointment in one
    /// transaction, guarded by the same version check as [`Self::update`].
    async fn reset_chat(&self, appointment: &Appointment) -> Result<Appointment>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync + Debug {
    /// Inserts the message unless the sender already used its `client_message_id`,
    /// in which case the stored message is returned with `false`.
    async fn create(&self, message: &Message) -> Result<(Message, bool)>;

    async fn find(&self, id: Uuid) -> Result<Option<Message>>;

    /// Ordered by `(created_at, id)`.
    async fn list_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Message>>;

    /// Writes a new body and the edit markers. `None` when the message has
    /// been deleted for everyone in the meantime.
    async fn update_body(&self, id: Uuid, body: &str, edited_at: OffsetDateTime) -> Result<Option<Message>>;

    /// Moves the stored body into `preserved_original_body`, marks the message
    /// deleted and clears its pin. `None` when it was already deleted.
    async fn tombstone(&self, id: Uuid, deleted_by: Uuid, at: OffsetDateTime) -> Result<Option<Message>>;

    /// Unpinning always applies; pinning a deleted message returns `false`.
    async fn set_pin(&self, id: Uuid, pin: Option<Pin>) -> Result<bool>;

    async fn add_removed_for(&self, id: Uuid, user_id: Uuid) -> Result<bool>;

    async fn set_starred(&self, id: Uuid, user_id: Uuid, starred: bool) -> Result<bool>;

    /// Promotes `sent` messages not authored by `reader` to `delivered`.
    /// Returns the ids that changed.
    async fn mark_delivered(&self, appointment_id: Uuid, reader: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>>;

    /// Adds `reader` to `read_by` of every message they did not author and have
    /// not read yet. Returns the ids that changed.
    async fn mark_read(&self, appointment_id: Uuid, reader: Uuid) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait ReportRepository: Send + Sync + Debug {
    async fn create(&self, report: &Report) -> Result<()>;

    async fn list(&self) -> Result<Vec<Report>>;
}

/// Bundle of repositories handed to the services.
#[derive(Clone, Debug)]
pub struct Storage {
    pub users: Arc<dyn UserRepository>,
    pub listings: Arc<dyn ListingRepository>,
    pub appointments: Arc<dyn AppointmentRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub reports: Arc<dyn ReportRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let store = Arc::new(crate::adapters::memory::MemoryStore::default());
        Self {
            users: Arc::clone(&store) as Arc<dyn UserRepository>,
            listings: Arc::clone(&store) as Arc<dyn ListingRepository>,
            appointments: Arc::clone(&store) as Arc<dyn AppointmentRepository>,
            messages: Arc::clone(&store) as Arc<dyn MessageRepository>,
            reports: store,
        }
    }

    #[must_use]
    pub fn postgres(pool: crate::adapters::database::DbPool) -> Self {
        use crate::adapters::database as db;
        Self {
            users: Arc::new(db::user_repo::PgUserRepository::new(pool.clone())),
            listings: Arc::new(db::listing_repo::PgListingRepository::new(pool.clone())),
            appointments: Arc::new(db::appointment_repo::PgAppointmentRepository::new(pool.clone())),
            messages: Arc::new(db::message_repo::PgMessageRepository::new(pool.clone())),
            reports: Arc::new(db::report_repo::PgReportRepository::new(pool)),
        }
    }
}
