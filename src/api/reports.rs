use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::reports::{ReportAccepted, ReportRequest, ReportResponse};
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

pub async fn report_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<ReportRequest>,
) -> Result<impl IntoResponse> {
    let id =
        state.report_service.report_message(&auth_user.actor, message_id, payload.reason, payload.details).await?;
    Ok((StatusCode::ACCEPTED, Json(ReportAccepted { id })))
}

pub async fn report_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<ReportRequest>,
) -> Result<impl IntoResponse> {
    let id = state
        .report_service
        .report_conversation(&auth_user.actor, appointment_id, payload.reason, payload.details)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ReportAccepted { id })))
}

pub async fn list_reports(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let reports: Vec<ReportResponse> =
        state.report_service.list(&auth_user.actor).await?.into_iter().map(ReportResponse::from).collect();
    Ok(Json(reports))
}
