use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::auth::{AuthSession, Login, Registration};
use crate::error::Result;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<Registration>,
) -> Result<impl IntoResponse> {
    let session = state.account_service.register(payload.username, payload.password).await?;
    Ok((StatusCode::CREATED, Json(AuthSession::from(session))))
}

pub async fn login(State(state): State<AppState>, Json(payload): Json<Login>) -> Result<impl IntoResponse> {
    let session = state.account_service.login(payload.username, payload.password).await?;
    Ok(Json(AuthSession::from(session)))
}

/// Soft-deletes the caller's account and closes their live connections.
pub async fn delete_account(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.account_service.delete_account(auth_user.actor.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
