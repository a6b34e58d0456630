use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Authentication failed")]
    AuthError,
    #[error("Forbidden: {0}")]
    Unauthorized(String),
    #[error("Not found")]
    NotFound,
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Record was modified concurrently")]
    StaleVersion,
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("A reason is required for this action")]
    ReasonRequired,
    #[error("Reinitiation limit reached")]
    ReinitiationExhausted,
    #[error("The other party no longer exists")]
    CounterpartyMissing,
    #[error("An active appointment already exists for this listing")]
    DuplicateActive,
    #[error("Chat is locked")]
    ChatLocked,
    #[error("Invalid chat password")]
    InvalidChatPassword,
    #[error("Chat is unavailable: {0}")]
    ChatUnavailable(String),
    #[error("Internal server error")]
    Internal,
}

impl AppError {
    /// Stable machine-readable code carried in every error body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Internal => "internal",
            Self::AuthError => "unauthenticated",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) | Self::StaleVersion => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ReasonRequired => "reason_required",
            Self::ReinitiationExhausted => "reinitiation_exhausted",
            Self::CounterpartyMissing => "counterparty_missing",
            Self::DuplicateActive => "duplicate_active",
            Self::ChatLocked => "chat_locked",
            Self::InvalidChatPassword => "invalid_chat_password",
            Self::ChatUnavailable(_) => "chat_unavailable",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AuthError => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(_) | Self::InvalidChatPassword => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_)
            | Self::StaleVersion
            | Self::InvalidTransition { .. }
            | Self::ReinitiationExhausted
            | Self::CounterpartyMissing
            | Self::DuplicateActive
            | Self::ChatUnavailable(_) => StatusCode::CONFLICT,
            Self::ReasonRequired => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ChatLocked => StatusCode::LOCKED,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "Internal server error".to_string()
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                "Internal server error".to_string()
            }
            Self::AuthError => {
                tracing::debug!("Authentication failed");
                "Unauthorized".to_string()
            }
            Self::NotFound => {
                tracing::debug!("Resource not found");
                "Not found".to_string()
            }
            other => {
                tracing::debug!(code, message = %other, "Request rejected");
                other.to_string()
            }
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
