use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConflictReason, StoreError};

/// Lifecycle state of a seat instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Held,
    Sold,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Held => "held",
            SeatStatus::Sold => "sold",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SeatStatus::Available),
            "held" => Ok(SeatStatus::Held),
            "sold" => Ok(SeatStatus::Sold),
            other => Err(StoreError::Corrupt(format!("unknown seat status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeatCategory {
    Standard,
    Premium,
    Vip,
}

impl SeatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatCategory::Standard => "standard",
            SeatCategory::Premium => "premium",
            SeatCategory::Vip => "vip",
        }
    }
}

impl fmt::Display for SeatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatCategory {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(SeatCategory::Standard),
            "premium" => Ok(SeatCategory::Premium),
            "vip" => Ok(SeatCategory::Vip),
            other => Err(StoreError::Corrupt(format!("unknown seat category '{}'", other))),
        }
    }
}

/// One bookable seat for one scheduled event.
///
/// `held_by` and `hold_expires_at` are set iff `status` is `Held`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatInstance {
    pub id: Uuid,
    pub event_id: Uuid,
    pub seat_id: Uuid,
    pub category: SeatCategory,
    pub price: Decimal,
    pub status: SeatStatus,
    pub held_by: Option<String>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl SeatInstance {
    /// Checks the holder/expiry invariant against the status.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            SeatStatus::Held => self.held_by.is_some() && self.hold_expires_at.is_some(),
            SeatStatus::Available | SeatStatus::Sold => {
                self.held_by.is_none() && self.hold_expires_at.is_none()
            }
        }
    }

    /// Why `requester` may not purchase this seat at `now`, if anything.
    pub fn purchase_violation(&self, requester: &str, now: DateTime<Utc>) -> Option<ConflictReason> {
        if self.status != SeatStatus::Held {
            return Some(ConflictReason::NotHeld);
        }
        if self.held_by.as_deref() != Some(requester) {
            return Some(ConflictReason::HeldByOther);
        }
        match self.hold_expires_at {
            Some(expires_at) if expires_at > now => None,
            _ => Some(ConflictReason::Expired),
        }
    }
}

/// Read model returned by the seat map query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatView {
    pub seat_id: Uuid,
    pub status: SeatStatus,
    pub price: Decimal,
    pub category: SeatCategory,
    pub row_label: String,
    pub seat_number: i32,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn held_by(holder: &str, expires_at: DateTime<Utc>) -> SeatInstance {
        SeatInstance {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            seat_id: Uuid::new_v4(),
            category: SeatCategory::Standard,
            price: dec!(100.00),
            status: SeatStatus::Held,
            held_by: Some(holder.to_string()),
            hold_expires_at: Some(expires_at),
        }
    }

    #[test]
    fn test_invariant_detects_dangling_holder() {
        let now = Utc::now();
        let mut seat = held_by("u1", now);
        assert!(seat.is_consistent());

        seat.status = SeatStatus::Sold;
        assert!(!seat.is_consistent());

        seat.held_by = None;
        seat.hold_expires_at = None;
        assert!(seat.is_consistent());
    }

    #[test]
    fn test_purchase_violation_reasons() {
        let now = Utc::now();
        let seat = held_by("u1", now + Duration::seconds(30));

        assert_eq!(seat.purchase_violation("u1", now), None);
        assert_eq!(seat.purchase_violation("u2", now), Some(ConflictReason::HeldByOther));
        assert_eq!(
            seat.purchase_violation("u1", now + Duration::seconds(30)),
            Some(ConflictReason::Expired)
        );

        let mut sold = seat.clone();
        sold.status = SeatStatus::Sold;
        sold.held_by = None;
        sold.hold_expires_at = None;
        assert_eq!(sold.purchase_violation("u1", now), Some(ConflictReason::NotHeld));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [SeatStatus::Available, SeatStatus::Held, SeatStatus::Sold] {
            assert_eq!(status.as_str().parse::<SeatStatus>().unwrap(), status);
        }
        assert!("locked".parse::<SeatStatus>().is_err());
    }
}
