use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingDetails, BookingStatus, LockedBooking};
use crate::error::StoreError;
use crate::seat::{SeatInstance, SeatView};

/// Precondition for the conditional held -> available update.
#[derive(Debug, Clone, Copy)]
pub enum ReleaseScope<'a> {
    /// Rows held with an expiry at or before this instant (expiry job).
    ExpiredBy(DateTime<Utc>),
    /// Rows held by this requester (explicit release).
    Holder(&'a str),
}

/// Source of truth for seat instances and bookings of scheduled events.
#[async_trait]
pub trait SeatLedger: Send + Sync {
    /// Opens a transaction. Dropping it without `commit` rolls back.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    /// Single conditional update: held -> available for the given rows that
    /// are still held and match `scope`. Returns the ids actually changed.
    async fn release_held(
        &self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        scope: ReleaseScope<'_>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Backstop for lost expiry jobs: releases up to `limit` rows of any event
    /// whose hold lapsed at or before `cutoff`, skipping rows another
    /// transaction has locked. Returns `(event_id, seat_id)` of changed rows.
    async fn release_lapsed(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Uuid, Uuid)>, StoreError>;

    /// Seat map of an event ordered by row label then seat number.
    async fn event_seats(&self, event_id: Uuid) -> Result<Vec<SeatView>, StoreError>;
}

/// One ledger transaction. Every row it writes is exclusively locked until
/// commit or rollback.
#[async_trait]
pub trait LedgerTx: Send {
    /// `SELECT ... FOR UPDATE` on the seat instances of `event_id` among
    /// `seat_ids`. Missing or foreign ids are simply absent from the result.
    async fn lock_seats(
        &mut self,
        event_id: Uuid,
        seat_ids: &[Uuid],
    ) -> Result<Vec<SeatInstance>, StoreError>;

    async fn mark_held(
        &mut self,
        seat_ids: &[Uuid],
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_sold(&mut self, seat_ids: &[Uuid]) -> Result<(), StoreError>;

    async fn mark_available(&mut self, seat_ids: &[Uuid]) -> Result<(), StoreError>;

    async fn insert_booking(&mut self, booking: &Booking, seat_ids: &[Uuid]) -> Result<(), StoreError>;

    async fn lock_booking(&mut self, booking_id: Uuid) -> Result<Option<LockedBooking>, StoreError>;

    async fn set_booking_status(
        &mut self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Read side of the booking ledger.
#[async_trait]
pub trait BookingReader: Send + Sync {
    /// Bookings of `user_id`, newest first.
    async fn bookings_for(&self, user_id: &str) -> Result<Vec<BookingDetails>, StoreError>;

    async fn booking(
        &self,
        booking_id: Uuid,
        user_id: &str,
    ) -> Result<Option<BookingDetails>, StoreError>;
}
