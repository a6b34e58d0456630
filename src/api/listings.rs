use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::listings::{ListingRequest, ListingResponse};
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

pub async fn create_listing(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ListingRequest>,
) -> Result<impl IntoResponse> {
    let listing = state.listing_service.create(auth_user.actor.user_id, payload.title).await?;
    Ok((StatusCode::CREATED, Json(ListingResponse::from(listing))))
}

pub async fn get_listing(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let listing = state.listing_service.get(id).await?;
    Ok(Json(ListingResponse::from(listing)))
}
