use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn new(user_id: Uuid, ttl_secs: u64) -> Self {
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let exp = OffsetDateTime::now_utc().unix_timestamp().saturating_add(ttl);
        Self { sub: user_id, exp }
    }

    /// Signs the claims with an HMAC secret.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the token cannot be encoded.
    pub fn encode(&self, secret: &str) -> Result<String> {
        encode(&Header::default(), self, &EncodingKey::from_secret(secret.as_bytes())).map_err(|_| AppError::Internal)
    }

    /// Verifies a bearer token and returns its claims.
    ///
    /// # Errors
    /// Returns `AppError::AuthError` if the token is malformed, expired or signed with another secret.
    pub fn decode(token: &str, secret: &str) -> Result<Self> {
        let token_data = decode::<Self>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
            .map_err(|_| AppError::AuthError)?;

        Ok(token_data.claims)
    }
}

/// Bearer token issued on registration and login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: Uuid,
    pub is_admin: bool,
    pub token: String,
    pub expires_at: i64,
}

/// Argon2 hashing shared by account passwords and chat lock passwords.
#[derive(Debug)]
pub struct Password;

impl Password {
    /// # Errors
    /// Returns `AppError::Internal` if hashing fails.
    #[tracing::instrument(skip(password), level = "debug")]
    pub fn hash(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(password.as_bytes(), &salt).map_err(|_| AppError::Internal)?;
        Ok(hash.to_string())
    }

    /// # Errors
    /// Returns `AppError::Internal` if the stored hash cannot be parsed.
    pub fn verify(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| AppError::Internal)?;
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok())
    }

    /// Runs [`Password::hash`] on the blocking pool.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if hashing fails or the blocking task panics.
    pub async fn hash_blocking(password: String) -> Result<String> {
        tokio::task::spawn_blocking(move || Self::hash(&password)).await.map_err(|_| AppError::Internal)?
    }

    /// Runs [`Password::verify`] on the blocking pool.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the hash is unreadable or the blocking task panics.
    pub async fn verify_blocking(password: String, hash: String) -> Result<bool> {
        tokio::task::spawn_blocking(move || Self::verify(&password, &hash)).await.map_err(|_| AppError::Internal)?
    }
}
