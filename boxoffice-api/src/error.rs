use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use boxoffice_core::ReservationError;

#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    RateLimited,
    Reservation(ReservationError),
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        AppError::Reservation(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::Unauthorized(msg) => {
                return (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response();
            }
            AppError::RateLimited => {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, "60")],
                    Json(json!({ "error": "Rate limit exceeded" })),
                )
                    .into_response();
            }
            AppError::Reservation(err) => err,
        };

        match err {
            ReservationError::Busy => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "1")],
                Json(json!({ "error": err.to_string() })),
            )
                .into_response(),
            ReservationError::Conflict { message, seats } => (
                StatusCode::CONFLICT,
                Json(json!({ "error": message, "seats": seats })),
            )
                .into_response(),
            ReservationError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            ReservationError::InvalidState(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": msg }))).into_response()
            }
            ReservationError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ReservationError::Internal(source) => {
                tracing::error!("Internal Server Error: {}", source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal Server Error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::{ConflictReason, SeatConflict, StoreError};
    use uuid::Uuid;

    fn status_of(err: ReservationError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_reservation_errors_map_to_status_codes() {
        assert_eq!(status_of(ReservationError::Busy), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_of(ReservationError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ReservationError::seat_conflicts(vec![SeatConflict::new(
                Uuid::new_v4(),
                ConflictReason::Expired
            )])),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ReservationError::InvalidState("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_of(ReservationError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ReservationError::Internal(StoreError::Database("password=secret".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_busy_asks_client_to_retry() {
        let response = AppError::from(ReservationError::Busy).into_response();
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }
}
