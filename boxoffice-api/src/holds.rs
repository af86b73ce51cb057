use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use boxoffice_core::{HoldRecord, ReservationError};
use boxoffice_reservation::HoldReceipt;

use crate::{error::AppError, middleware::Claims, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SeatSelection {
    pub seat_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub event_id: Uuid,
    pub released: Vec<Uuid>,
}

/// Routes subject to the booking rate limit.
pub fn limited_routes() -> Router<AppState> {
    Router::new().route("/v1/events/{event_id}/holds", post(acquire_hold))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/events/{event_id}/holds/release", post(release_hold))
        .route("/v1/events/{event_id}/holds/me", get(my_hold))
}

async fn acquire_hold(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<SeatSelection>,
) -> Result<(StatusCode, Json<HoldReceipt>), AppError> {
    let receipt = state.engine.hold(event_id, &claims.sub, &req.seat_ids).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn release_hold(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<SeatSelection>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let released = state.engine.release(event_id, &claims.sub, &req.seat_ids).await?;
    Ok(Json(ReleaseResponse { event_id, released }))
}

/// Reads the hold mirror. Absence does not prove there is no hold.
async fn my_hold(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<HoldRecord>, AppError> {
    state
        .engine
        .current_hold(event_id, &claims.sub)
        .await?
        .map(Json)
        .ok_or_else(|| ReservationError::NotFound("no active hold for this event".to_string()).into())
}
