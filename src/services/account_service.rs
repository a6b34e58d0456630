use crate::config::AuthConfig;
use crate::domain::auth::{AuthSession, Claims, Password};
use crate::domain::event::BusEvent;
use crate::domain::user::{Actor, User};
use crate::error::{AppError, Result};
use crate::services::event_bus::EventBus;
use crate::storage::UserRepository;
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_USERNAME_LENGTH: usize = 64;

#[derive(Clone, Debug)]
struct Metrics {
    users_registered_total: Counter<u64>,
    login_total: Counter<u64>,
    accounts_deleted_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            users_registered_total: meter
                .u64_counter("rendezvous_users_registered_total")
                .with_description("Total number of successful user registrations")
                .build(),
            login_total: meter
                .u64_counter("rendezvous_auth_login_total")
                .with_description("Total number of successful login attempts")
                .build(),
            accounts_deleted_total: meter
                .u64_counter("rendezvous_accounts_deleted_total")
                .with_description("Total number of soft-deleted accounts")
                .build(),
        }
    }
}

/// Registration, login and account lifecycle.
#[derive(Clone, Debug)]
pub struct AccountService {
    config: AuthConfig,
    users: Arc<dyn UserRepository>,
    bus: EventBus,
    metrics: Metrics,
}

impl AccountService {
    #[must_use]
    pub fn new(config: AuthConfig, users: Arc<dyn UserRepository>, bus: EventBus) -> Self {
        Self { config, users, bus, metrics: Metrics::new() }
    }

    fn issue(&self, user: &User) -> Result<AuthSession> {
        let claims = Claims::new(user.id, self.config.access_token_ttl_secs);
        let token = claims.encode(&self.config.jwt_secret)?;
        Ok(AuthSession { user_id: user.id, is_admin: user.is_admin, token, expires_at: claims.exp })
    }

    fn validate_credentials(username: &str, password: &str) -> Result<()> {
        if username.is_empty() || username.chars().count() > MAX_USERNAME_LENGTH {
            return Err(AppError::BadRequest(format!("Username must be between 1 and {MAX_USERNAME_LENGTH} characters")));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::BadRequest(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
            )));
        }
        Ok(())
    }

    #[tracing::instrument(
        skip(self, username, password),
        fields(user_id = tracing::field::Empty),
        err(level = "warn")
    )]
    pub async fn register(&self, username: String, password: String) -> Result<AuthSession> {
        let username = username.trim().to_string();
        Self::validate_credentials(&username, &password)?;

        let password_hash = Password::hash_blocking(password).await?;
        let user = User {
            id: Uuid::now_v7(),
            username,
            password_hash,
            is_admin: false,
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        self.users.create(&user).await?;

        tracing::Span::current().record("user_id", tracing::field::display(user.id));
        tracing::info!("User registered successfully");
        self.metrics.users_registered_total.add(1, &[]);

        self.issue(&user)
    }

    #[tracing::instrument(
        skip(self, username, password),
        fields(user_id = tracing::field::Empty),
        err(level = "warn")
    )]
    pub async fn login(&self, username: String, password: String) -> Result<AuthSession> {
        let user = match self.users.find_by_username(username.trim()).await? {
            Some(u) if u.is_active() => u,
            _ => {
                tracing::warn!("Login failed: user not found");
                return Err(AppError::AuthError);
            }
        };

        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        if !Password::verify_blocking(password, user.password_hash.clone()).await? {
            tracing::warn!("Login failed: invalid password");
            return Err(AppError::AuthError);
        }

        self.metrics.login_total.add(1, &[]);
        self.issue(&user)
    }

    /// Resolves a bearer token to the caller. Deleted accounts are rejected.
    ///
    /// # Errors
    /// Returns `AppError::AuthError` for bad tokens and unknown or deleted users.
    pub async fn authenticate(&self, token: &str) -> Result<Actor> {
        let claims = Claims::decode(token, &self.config.jwt_secret)?;
        match self.users.find_by_id(claims.sub).await? {
            Some(user) if user.is_active() => Ok(Actor { user_id: user.id, is_admin: user.is_admin }),
            _ => Err(AppError::AuthError),
        }
    }

    /// Whether the user exists and has not deleted their account.
    pub async fn is_active(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.users.find_by_id(user_id).await?.is_some_and(|u| u.is_active()))
    }

    /// Soft-deletes the account and disconnects its live sessions. Appointments
    /// the user took part in stay, with this user now a missing counterparty.
    #[tracing::instrument(skip(self), err(level = "warn"))]
    pub async fn delete_account(&self, user_id: Uuid) -> Result<()> {
        if !self.users.soft_delete(user_id, OffsetDateTime::now_utc()).await? {
            return Err(AppError::NotFound);
        }

        tracing::info!("Account deleted");
        self.metrics.accounts_deleted_total.add(1, &[]);
        self.bus.publish_to_user(user_id, BusEvent::Disconnect);
        Ok(())
    }

    /// Creates or promotes the configured administrator account.
    #[tracing::instrument(skip(self), err)]
    pub async fn seed_admin(&self) -> Result<Option<Uuid>> {
        let (Some(username), Some(password)) = (&self.config.admin_username, &self.config.admin_password) else {
            return Ok(None);
        };

        let password_hash = Password::hash_blocking(password.clone()).await?;
        let admin = self
            .users
            .upsert_admin(&User {
                id: Uuid::now_v7(),
                username: username.clone(),
                password_hash,
                is_admin: true,
                created_at: OffsetDateTime::now_utc(),
                deleted_at: None,
            })
            .await?;

        tracing::info!(user_id = %admin.id, "Administrator account ready");
        Ok(Some(admin.id))
    }
}
