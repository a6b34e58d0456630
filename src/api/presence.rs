use crate::api::AppState;
use crate::api::middleware::AuthUser;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

pub async fn get_presence(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    Json(state.presence_service.snapshot(user_id))
}
