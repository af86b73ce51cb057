use std::sync::Arc;
use std::time::Duration;

use boxoffice_core::services::FanOut;
use boxoffice_reservation::{ReservationEngine, ReservationSettings, RoomHub};
use boxoffice_store::app_config::ReservationConfig;

use crate::middleware::RateLimiter;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    /// Local rooms; WebSocket subscribers live here.
    pub hub: Arc<RoomHub>,
    /// Membership goes through the configured fan-out.
    pub fanout: Arc<dyn FanOut>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub booking_per_minute: i64,
    pub auth: AuthConfig,
}

pub fn reservation_settings(config: &ReservationConfig) -> ReservationSettings {
    ReservationSettings {
        hold_duration: Duration::from_secs(config.hold_seconds),
        max_seats_per_hold: config.max_seats_per_hold,
        debounce_ttl: Duration::from_secs(config.debounce_seconds),
        ..ReservationSettings::default()
    }
}
