use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::domain::appointment::AppointmentView;
use crate::error::{AppError, Result};
use axum::{Json, extract::State, response::IntoResponse};
use time::OffsetDateTime;

/// Every appointment, including ones the parties removed from view.
pub async fn list_appointments(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    if !auth_user.actor.is_admin {
        return Err(AppError::Unauthorized("administrators only".into()));
    }
    let now = OffsetDateTime::now_utc();
    let views: Vec<AppointmentView> = state
        .appointment_service
        .list(&auth_user.actor)
        .await?
        .iter()
        .map(|appointment| appointment.view_for(&auth_user.actor, now))
        .collect();
    Ok(Json(views))
}
