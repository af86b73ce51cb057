use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use boxoffice_core::BookingDetails;
use boxoffice_reservation::{CancelledBooking, ConfirmedBooking};

use crate::{error::AppError, middleware::Claims, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    #[serde(default)]
    pub payment_ref: String,
}

/// Routes subject to the booking rate limit.
pub fn limited_routes() -> Router<AppState> {
    Router::new().route("/v1/bookings/confirm", post(confirm_booking))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", get(list_bookings))
        .route("/v1/bookings/{booking_id}", get(get_booking))
        .route("/v1/bookings/{booking_id}/cancel", post(cancel_booking))
}

async fn confirm_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ConfirmRequest>,
) -> Result<(StatusCode, Json<ConfirmedBooking>), AppError> {
    let booking = state
        .engine
        .confirm(req.event_id, &claims.sub, &req.seat_ids, &req.payment_ref)
        .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<BookingDetails>>, AppError> {
    Ok(Json(state.engine.bookings(&claims.sub).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingDetails>, AppError> {
    Ok(Json(state.engine.booking(booking_id, &claims.sub).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<CancelledBooking>, AppError> {
    Ok(Json(state.engine.cancel(booking_id, &claims.sub).await?))
}
