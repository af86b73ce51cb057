use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::seat::SeatCategory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(StoreError::Corrupt(format!("unknown booking status '{}'", other))),
        }
    }
}

/// A finalized purchase. Only `status` changes after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: String,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub payment_ref: String,
    pub booked_at: DateTime<Utc>,
}

/// Booking row locked inside a ledger transaction, with what cancellation needs.
#[derive(Debug, Clone)]
pub struct LockedBooking {
    pub booking: Booking,
    pub event_starts_at: DateTime<Utc>,
    pub seat_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingSeat {
    pub seat_id: Uuid,
    pub row_label: String,
    pub seat_number: i32,
    pub category: SeatCategory,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub event_starts_at: DateTime<Utc>,
    pub seats: Vec<BookingSeat>,
}
