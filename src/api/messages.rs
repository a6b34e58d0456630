use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::messages::{
    DeleteQuery, DeliveredRequest, EditMessageRequest, PinRequest, ReceiptResponse, SendMessageRequest, StarRequest,
};
use crate::domain::message::{Message, MessageView};
use crate::domain::user::Actor;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use time::OffsetDateTime;
use uuid::Uuid;

fn render(message: &Message, actor: &Actor) -> Json<MessageView> {
    Json(message.view_for(actor, OffsetDateTime::now_utc()))
}

pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let messages = state.message_service.list(&auth_user.actor, appointment_id).await?;
    Ok(Json(messages))
}

/// Sends a message. Retrying with the same `clientMessageId` returns the stored record.
///
/// # Errors
/// Returns `AppError::ChatLocked` if the chat is locked for the caller.
/// Returns `AppError::ChatUnavailable` once the appointment date has passed.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = state.message_service.send(&auth_user.actor, appointment_id, payload.into()).await?;
    Ok((StatusCode::CREATED, render(&message, &auth_user.actor)))
}

pub async fn edit_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<EditMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = state.message_service.edit(&auth_user.actor, message_id, payload.body).await?;
    Ok(render(&message, &auth_user.actor))
}

pub async fn delete_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse> {
    state.message_service.delete(&auth_user.actor, message_id, query.scope).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn star_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<StarRequest>,
) -> Result<impl IntoResponse> {
    let message = state.message_service.star(&auth_user.actor, message_id, payload.starred).await?;
    Ok(render(&message, &auth_user.actor))
}

pub async fn pin_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<PinRequest>,
) -> Result<impl IntoResponse> {
    let message = state.message_service.pin(&auth_user.actor, message_id, payload.duration()).await?;
    Ok(render(&message, &auth_user.actor))
}

pub async fn active_pins(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let pins = state.message_service.active_pins(&auth_user.actor, appointment_id).await?;
    Ok(Json(pins))
}

pub async fn mark_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let message_ids = state.receipt_service.mark_read(&auth_user.actor, appointment_id).await?;
    Ok(Json(ReceiptResponse { message_ids }))
}

pub async fn mark_delivered(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<DeliveredRequest>,
) -> Result<impl IntoResponse> {
    let message_ids =
        state.receipt_service.mark_delivered(&auth_user.actor, appointment_id, &payload.message_ids).await?;
    Ok(Json(ReceiptResponse { message_ids }))
}
