use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::appointments::{LockRequest, ResetLockRequest};
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

pub async fn lock_chat(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<LockRequest>,
) -> Result<impl IntoResponse> {
    state.access_gate.lock(&auth_user.actor, appointment_id, payload.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Grants the caller access for as long as one of their connections stays open.
pub async fn unlock_chat(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<LockRequest>,
) -> Result<impl IntoResponse> {
    state.access_gate.unlock(&auth_user.actor, appointment_id, payload.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_lock(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<LockRequest>,
) -> Result<impl IntoResponse> {
    state.access_gate.remove_lock(&auth_user.actor, appointment_id, payload.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Removes the lock by purging the conversation. Requires `"confirm": true`.
pub async fn reset_lock(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<ResetLockRequest>,
) -> Result<impl IntoResponse> {
    state.access_gate.forgot_password(&auth_user.actor, appointment_id, payload.confirm).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn close_chat(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> impl IntoResponse {
    state.access_gate.close_chat(appointment_id, auth_user.actor.user_id);
    StatusCode::NO_CONTENT
}
