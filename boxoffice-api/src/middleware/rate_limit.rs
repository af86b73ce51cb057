use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use boxoffice_store::RedisClient;

use crate::{error::AppError, middleware::Claims, state::AppState};

/// Fixed-window request counter. Implementations fail open.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, key: &str, limit: i64, window_seconds: i64) -> bool;
}

#[async_trait]
impl RateLimiter for RedisClient {
    async fn allow(&self, key: &str, limit: i64, window_seconds: i64) -> bool {
        match self.check_rate_limit(key, limit, window_seconds).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!("Rate limiter unavailable, letting request through: {}", e);
                true
            }
        }
    }
}

pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn allow(&self, _key: &str, _limit: i64, _window_seconds: i64) -> bool {
        true
    }
}

/// Per-requester limit on hold and confirm. Runs after authentication.
pub async fn booking_rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.booking_per_minute <= 0 {
        return Ok(next.run(req).await);
    }

    let requester = req
        .extensions()
        .get::<Claims>()
        .map(|claims| claims.sub.clone())
        .ok_or_else(|| AppError::Unauthorized("missing identity".to_string()))?;

    let key = format!("ratelimit:booking:{}", requester);
    if state.rate_limiter.allow(&key, state.booking_per_minute, 60).await {
        Ok(next.run(req).await)
    } else {
        Err(AppError::RateLimited)
    }
}
