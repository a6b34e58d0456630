use crate::domain::auth::Password;
use crate::error::{AppError, Result};
use time::OffsetDateTime;
use uuid::Uuid;

/// Password gate on an appointment's chat. Only the argon2 hash is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLock {
    pub password_hash: String,
    pub locked_by: Uuid,
    pub locked_at: OffsetDateTime,
}

impl ChatLock {
    /// Hashes `password` on the blocking pool and builds a lock record.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` if the password is shorter than `min_len`.
    pub async fn create(password: String, locked_by: Uuid, now: OffsetDateTime, min_len: usize) -> Result<Self> {
        if password.chars().count() < min_len {
            return Err(AppError::BadRequest(format!("Chat password must be at least {min_len} characters")));
        }
        let password_hash = Password::hash_blocking(password).await?;
        Ok(Self { password_hash, locked_by, locked_at: now })
    }

    /// # Errors
    /// Returns `AppError::InvalidChatPassword` on mismatch.
    pub async fn verify(&self, password: String) -> Result<()> {
        if Password::verify_blocking(password, self.password_hash.clone()).await? {
            Ok(())
        } else {
            Err(AppError::InvalidChatPassword)
        }
    }
}
