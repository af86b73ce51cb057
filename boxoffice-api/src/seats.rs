use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use boxoffice_core::SeatView;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
pub struct SeatMapResponse {
    pub event_id: Uuid,
    pub seats: Vec<SeatView>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/events/{event_id}/seats", get(get_seats))
}

/// Public seat map, ordered by row then number.
async fn get_seats(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<SeatMapResponse>, AppError> {
    let seats = state.engine.seats(event_id).await?;
    Ok(Json(SeatMapResponse { event_id, seats }))
}
