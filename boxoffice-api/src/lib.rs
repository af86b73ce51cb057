use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod error;
pub mod holds;
pub mod middleware;
pub mod relay;
pub mod seats;
pub mod state;
pub mod ws;

pub use state::{AppState, AuthConfig};

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Hold and confirm are rate limited per requester
    let limited = Router::new()
        .merge(holds::limited_routes())
        .merge(bookings::limited_routes())
        .route_layer(from_fn_with_state(state.clone(), middleware::booking_rate_limit));

    // Authentication runs before the rate limit, which keys on the subject
    let protected = Router::new()
        .merge(limited)
        .merge(holds::routes())
        .merge(bookings::routes())
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(seats::routes())
        .merge(ws::routes())
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
