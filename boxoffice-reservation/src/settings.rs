use std::time::Duration;

use boxoffice_core::RetryPolicy;

/// Tunables of the reservation engine.
#[derive(Debug, Clone)]
pub struct ReservationSettings {
    /// How long a hold lasts before the expiry job may release it.
    pub hold_duration: Duration,
    pub max_seats_per_hold: usize,
    /// TTL of the per-(event, requester) mutual-exclusion key.
    pub debounce_ttl: Duration,
    pub expiry_retry: RetryPolicy,
    pub notification_retry: RetryPolicy,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            hold_duration: Duration::from_secs(600),
            max_seats_per_hold: 10,
            debounce_ttl: Duration::from_secs(10),
            expiry_retry: RetryPolicy::exponential(3, 2_000),
            notification_retry: RetryPolicy::exponential(3, 3_000),
        }
    }
}

impl ReservationSettings {
    pub(crate) fn hold_span(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.hold_duration).unwrap_or_else(|_| chrono::Duration::seconds(600))
    }
}
