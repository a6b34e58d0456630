use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::appointments::{AppointmentRequest, ClearChatResponse, ReinitiateRequest, TransitionRequest};
use crate::domain::appointment::{Appointment, AppointmentView};
use crate::domain::user::Actor;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use time::OffsetDateTime;
use uuid::Uuid;

fn render(appointment: &Appointment, actor: &Actor) -> Json<AppointmentView> {
    Json(appointment.view_for(actor, OffsetDateTime::now_utc()))
}

/// Requests an appointment on a listing. The listing owner becomes the responder.
///
/// # Errors
/// Returns `AppError::DuplicateActive` if the caller already has an open request on the listing.
pub async fn create_appointment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<AppointmentRequest>,
) -> Result<impl IntoResponse> {
    let appointment = state.appointment_service.create(&auth_user.actor, payload.into()).await?;
    Ok((StatusCode::CREATED, render(&appointment, &auth_user.actor)))
}

pub async fn list_appointments(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
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

pub async fn get_appointment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let appointment = state.appointment_service.get(&auth_user.actor, id).await?;
    Ok(render(&appointment, &auth_user.actor))
}

pub async fn transition_appointment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<impl IntoResponse> {
    let appointment =
        state.appointment_service.transition(&auth_user.actor, id, payload.target, payload.reason).await?;
    Ok(render(&appointment, &auth_user.actor))
}

pub async fn reinitiate_appointment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReinitiateRequest>>,
) -> Result<impl IntoResponse> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let appointment = state.appointment_service.reinitiate(&auth_user.actor, id, payload.schedule()?).await?;
    Ok(render(&appointment, &auth_user.actor))
}

pub async fn archive_appointment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let appointment = state.appointment_service.set_archived(&auth_user.actor, id, true).await?;
    Ok(render(&appointment, &auth_user.actor))
}

pub async fn unarchive_appointment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let appointment = state.appointment_service.set_archived(&auth_user.actor, id, false).await?;
    Ok(render(&appointment, &auth_user.actor))
}

/// Hides the appointment from the caller's table. The other party keeps it.
pub async fn remove_from_view(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.appointment_service.remove_from_view(&auth_user.actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_chat(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let cleared_at = state.message_service.clear_chat(&auth_user.actor, id).await?;
    Ok(Json(ClearChatResponse { cleared_at }))
}
