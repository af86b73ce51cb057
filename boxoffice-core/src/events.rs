use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::seat::SeatStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatChange {
    pub seat_id: Uuid,
    pub status: SeatStatus,
}

/// Seat-state change broadcast to everyone viewing `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatDelta {
    pub event_id: Uuid,
    pub seats: Vec<SeatChange>,
}

impl SeatDelta {
    /// Every seat in `seat_ids` moved to the same `status`.
    pub fn uniform(event_id: Uuid, seat_ids: &[Uuid], status: SeatStatus) -> Self {
        Self {
            event_id,
            seats: seat_ids
                .iter()
                .map(|&seat_id| SeatChange { seat_id, status })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }
}
