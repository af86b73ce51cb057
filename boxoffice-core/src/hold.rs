use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cache-side mirror of an in-progress hold. Never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldRecord {
    pub event_id: Uuid,
    pub holder_id: String,
    pub seat_ids: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}
