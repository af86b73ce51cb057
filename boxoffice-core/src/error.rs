use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Failures of the storage, cache, queue and channel adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    /// Lock wait timed out or the database broke a deadlock.
    #[error("row contention: {0}")]
    Contention(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("job queue error: {0}")]
    Queue(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    Unavailable,
    NotHeld,
    HeldByOther,
    Expired,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictReason::Unavailable => "is no longer available",
            ConflictReason::NotHeld => "is not held",
            ConflictReason::HeldByOther => "is held by another user",
            ConflictReason::Expired => "hold has expired",
        };
        f.write_str(text)
    }
}

/// A single seat that blocked an operation, and why.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SeatConflict {
    pub seat_id: Uuid,
    pub reason: ConflictReason,
}

impl SeatConflict {
    pub fn new(seat_id: Uuid, reason: ConflictReason) -> Self {
        Self { seat_id, reason }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("another request for this event is in progress, please retry")]
    Busy,

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict {
        message: String,
        seats: Vec<SeatConflict>,
    },

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error("internal error")]
    Internal(#[source] StoreError),
}

impl ReservationError {
    pub fn seat_conflicts(seats: Vec<SeatConflict>) -> Self {
        let message = describe_conflicts(&seats);
        ReservationError::Conflict { message, seats }
    }

    pub fn booking_conflict(message: impl Into<String>) -> Self {
        ReservationError::Conflict {
            message: message.into(),
            seats: Vec::new(),
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Contention(_) => ReservationError::Busy,
            other => ReservationError::Internal(other),
        }
    }
}

fn describe_conflicts(seats: &[SeatConflict]) -> String {
    match seats {
        [] => "seat state changed, please refresh".to_string(),
        [only] => format!("seat {} {}", only.seat_id, only.reason),
        many => {
            let detail = many
                .iter()
                .map(|c| format!("{} {}", c.seat_id, c.reason))
                .collect::<Vec<_>>()
                .join("; ");
            format!("{} seat(s) cannot be used: {}", many.len(), detail)
        }
    }
}
