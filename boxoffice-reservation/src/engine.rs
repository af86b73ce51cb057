use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use boxoffice_core::pricing;
use boxoffice_core::repository::{BookingReader, ReleaseScope, SeatLedger};
use boxoffice_core::services::{FanOut, JobQueue, LockService, LockToken};
use boxoffice_core::{
    Booking, BookingDetails, BookingStatus, Clock, ConflictReason, HoldRecord, Job, Notification,
    NotificationKind, ReservationError, ReservationResult, SeatConflict, SeatDelta, SeatStatus,
    SeatView,
};

use crate::settings::ReservationSettings;

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EngineParts {
    pub ledger: Arc<dyn SeatLedger>,
    pub bookings: Arc<dyn BookingReader>,
    pub locks: Arc<dyn LockService>,
    pub jobs: Arc<dyn JobQueue>,
    pub fanout: Arc<dyn FanOut>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldReceipt {
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmedBooking {
    pub booking_id: Uuid,
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelledBooking {
    pub booking_id: Uuid,
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
}

/// Runs the hold -> confirm / expire / release / cancel state machine over
/// the seat ledger.
///
/// Exclusivity comes only from ledger transactions with row locks. The lock
/// service, the job queue and the fan-out channel are side channels: their
/// failures are logged and never undo a committed transition (the single
/// exception is a hold whose expiry job cannot be scheduled, which is undone
/// so it cannot stay held forever).
pub struct ReservationEngine {
    ledger: Arc<dyn SeatLedger>,
    bookings: Arc<dyn BookingReader>,
    locks: Arc<dyn LockService>,
    jobs: Arc<dyn JobQueue>,
    fanout: Arc<dyn FanOut>,
    clock: Arc<dyn Clock>,
    settings: ReservationSettings,
}

impl ReservationEngine {
    pub fn new(parts: EngineParts, settings: ReservationSettings) -> Self {
        Self {
            ledger: parts.ledger,
            bookings: parts.bookings,
            locks: parts.locks,
            jobs: parts.jobs,
            fanout: parts.fanout,
            clock: parts.clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ReservationSettings {
        &self.settings
    }

    // ========================================================================
    // Hold
    // ========================================================================

    /// Places a time-bounded exclusive hold on `seat_ids` for `requester`.
    pub async fn hold(
        &self,
        event_id: Uuid,
        requester: &str,
        seat_ids: &[Uuid],
    ) -> ReservationResult<HoldReceipt> {
        let seat_ids = self.selection(seat_ids)?;

        // 1. Debounce duplicate clicks of the same user on the same event
        let token = self.acquire_debounce(event_id, requester).await?;

        // 2-6. Ledger transaction, cache mirror, expiry job
        let outcome = self.hold_in_ledger(event_id, requester, &seat_ids).await;

        // 7. The debounce key goes away on every path
        if let Some(token) = token {
            if let Err(e) = self.locks.release(&token).await {
                warn!(event_id = %event_id, error = %e, "Failed to release debounce lock");
            }
        }

        let receipt = outcome?;

        // 8. Tell everyone looking at this event
        self.broadcast(SeatDelta::uniform(event_id, &receipt.seat_ids, SeatStatus::Held))
            .await;

        Ok(receipt)
    }

    async fn acquire_debounce(
        &self,
        event_id: Uuid,
        requester: &str,
    ) -> ReservationResult<Option<LockToken>> {
        let key = format!("lock:event:{}:user:{}", event_id, requester);

        match self.locks.try_acquire(&key, self.settings.debounce_ttl).await {
            Ok(Some(token)) => Ok(Some(token)),
            Ok(None) => {
                debug!(event_id = %event_id, requester, "Hold already in progress for requester");
                Err(ReservationError::Busy)
            }
            Err(e) => {
                // Row locks still serialize overlapping holds
                warn!(event_id = %event_id, error = %e, "Debounce lock unavailable, continuing without it");
                Ok(None)
            }
        }
    }

    async fn hold_in_ledger(
        &self,
        event_id: Uuid,
        requester: &str,
        seat_ids: &[Uuid],
    ) -> ReservationResult<HoldReceipt> {
        let expires_at = (self.clock.now() + self.settings.hold_span()).trunc_subsecs(6);

        let mut tx = self.ledger.begin().await?;

        let rows = tx.lock_seats(event_id, seat_ids).await?;
        if rows.len() != seat_ids.len() {
            return Err(ReservationError::NotFound(
                "one or more seats not found for this event".to_string(),
            ));
        }

        let conflicts: Vec<SeatConflict> = rows
            .iter()
            .filter(|seat| seat.status != SeatStatus::Available)
            .map(|seat| SeatConflict::new(seat.id, ConflictReason::Unavailable))
            .collect();
        if !conflicts.is_empty() {
            return Err(ReservationError::seat_conflicts(conflicts));
        }

        tx.mark_held(seat_ids, requester, expires_at).await?;
        tx.commit().await?;

        info!(event_id = %event_id, holder = requester, seats = seat_ids.len(), %expires_at, "Seats held");

        let record = HoldRecord {
            event_id,
            holder_id: requester.to_string(),
            seat_ids: seat_ids.to_vec(),
            expires_at,
        };
        if let Err(e) = self.locks.put_hold(&record, self.settings.hold_duration).await {
            warn!(event_id = %event_id, error = %e, "Failed to mirror hold in cache");
        }

        let job = Job::ReleaseSeats {
            event_id,
            seat_ids: seat_ids.to_vec(),
            expires_at,
        };
        if let Err(e) = self
            .jobs
            .schedule(job, self.settings.hold_duration, self.settings.expiry_retry)
            .await
        {
            error!(event_id = %event_id, error = %e, "Could not schedule hold expiry, undoing hold");
            self.undo_hold(event_id, requester, seat_ids, expires_at).await;
            return Err(ReservationError::Internal(e));
        }

        Ok(HoldReceipt {
            event_id,
            seat_ids: seat_ids.to_vec(),
            expires_at,
        })
    }

    async fn undo_hold(&self, event_id: Uuid, requester: &str, seat_ids: &[Uuid], expires_at: DateTime<Utc>) {
        match self
            .ledger
            .release_held(event_id, seat_ids, ReleaseScope::ExpiredBy(expires_at))
            .await
        {
            Ok(released) => debug!(event_id = %event_id, released = released.len(), "Hold undone"),
            Err(e) => error!(event_id = %event_id, error = %e, "Failed to undo hold, seats stay held"),
        }
        if let Err(e) = self.locks.clear_hold(event_id, requester).await {
            warn!(event_id = %event_id, error = %e, "Failed to clear hold mirror");
        }
    }

    // ========================================================================
    // Expire / Release
    // ========================================================================

    /// Expiry job body. Safe to run late and more than once: only rows still
    /// held by the same (or an earlier) hold change.
    pub async fn expire(
        &self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        expires_at: DateTime<Utc>,
    ) -> ReservationResult<Vec<Uuid>> {
        let released = self
            .ledger
            .release_held(event_id, seat_ids, ReleaseScope::ExpiredBy(expires_at))
            .await?;

        if released.is_empty() {
            debug!(event_id = %event_id, "Expiry found nothing left to release");
            return Ok(released);
        }

        info!(event_id = %event_id, released = released.len(), "Released expired holds");
        self.broadcast(SeatDelta::uniform(event_id, &released, SeatStatus::Available))
            .await;

        Ok(released)
    }

    /// Releases holds whose expiry passed but whose expiry job never landed
    /// (dead-lettered or lost). Returns how many seats changed.
    pub async fn sweep_lapsed(&self, limit: usize) -> ReservationResult<usize> {
        let released = self.ledger.release_lapsed(self.clock.now(), limit).await?;
        if released.is_empty() {
            return Ok(0);
        }

        let mut by_event: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for (event_id, seat_id) in &released {
            by_event.entry(*event_id).or_default().push(*seat_id);
        }

        for (event_id, mut seat_ids) in by_event {
            seat_ids.sort();
            warn!(event_id = %event_id, released = seat_ids.len(), "Swept lapsed holds missed by expiry jobs");
            self.broadcast(SeatDelta::uniform(event_id, &seat_ids, SeatStatus::Available))
                .await;
        }

        Ok(released.len())
    }

    /// User-initiated release of the requester's own holds.
    pub async fn release(
        &self,
        event_id: Uuid,
        requester: &str,
        seat_ids: &[Uuid],
    ) -> ReservationResult<Vec<Uuid>> {
        let seat_ids = self.selection(seat_ids)?;

        let released = self
            .ledger
            .release_held(event_id, &seat_ids, ReleaseScope::Holder(requester))
            .await?;

        if let Err(e) = self.locks.clear_hold(event_id, requester).await {
            warn!(event_id = %event_id, error = %e, "Failed to clear hold mirror");
        }

        if !released.is_empty() {
            info!(event_id = %event_id, holder = requester, released = released.len(), "Seats released");
            self.broadcast(SeatDelta::uniform(event_id, &released, SeatStatus::Available))
                .await;
        }

        Ok(released)
    }

    // ========================================================================
    // Confirm
    // ========================================================================

    /// Turns the requester's live hold on `seat_ids` into a confirmed booking.
    pub async fn confirm(
        &self,
        event_id: Uuid,
        requester: &str,
        seat_ids: &[Uuid],
        payment_ref: &str,
    ) -> ReservationResult<ConfirmedBooking> {
        let seat_ids = self.selection(seat_ids)?;
        // Opaque and already settled; stored as given
        let payment_ref = payment_ref.trim();

        let booking = self
            .confirm_in_ledger(event_id, requester, &seat_ids, payment_ref)
            .await?;

        if let Err(e) = self.locks.clear_hold(event_id, requester).await {
            warn!(event_id = %event_id, error = %e, "Failed to clear hold mirror");
        }

        self.notify(
            NotificationKind::BookingConfirmed,
            requester,
            json!({
                "booking_id": booking.id,
                "event_id": event_id,
                "seat_ids": seat_ids,
                "total_amount": booking.total_amount,
                "payment_ref": booking.payment_ref,
            }),
        )
        .await;

        self.broadcast(SeatDelta::uniform(event_id, &seat_ids, SeatStatus::Sold))
            .await;

        Ok(ConfirmedBooking {
            booking_id: booking.id,
            event_id,
            seat_ids,
            total_amount: booking.total_amount,
        })
    }

    async fn confirm_in_ledger(
        &self,
        event_id: Uuid,
        requester: &str,
        seat_ids: &[Uuid],
        payment_ref: &str,
    ) -> ReservationResult<Booking> {
        let now = self.clock.now();
        let mut tx = self.ledger.begin().await?;

        let rows = tx.lock_seats(event_id, seat_ids).await?;
        if rows.len() != seat_ids.len() {
            return Err(ReservationError::NotFound(
                "one or more seats not found for this event".to_string(),
            ));
        }

        let conflicts: Vec<SeatConflict> = rows
            .iter()
            .filter_map(|seat| {
                seat.purchase_violation(requester, now)
                    .map(|reason| SeatConflict::new(seat.id, reason))
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(ReservationError::seat_conflicts(conflicts));
        }

        let booking = Booking {
            id: Uuid::new_v4(),
            event_id,
            user_id: requester.to_string(),
            total_amount: pricing::total(rows.iter().map(|seat| &seat.price)),
            status: BookingStatus::Confirmed,
            payment_ref: payment_ref.to_string(),
            booked_at: now.trunc_subsecs(6),
        };

        tx.mark_sold(seat_ids).await?;
        tx.insert_booking(&booking, seat_ids).await?;
        tx.commit().await?;

        info!(booking_id = %booking.id, event_id = %event_id, total = %booking.total_amount, "Booking confirmed");
        Ok(booking)
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    /// Cancels a confirmed booking before its event starts and returns the
    /// seats to sale.
    pub async fn cancel(&self, booking_id: Uuid, requester: &str) -> ReservationResult<CancelledBooking> {
        let now = self.clock.now();
        let mut tx = self.ledger.begin().await?;

        let locked = match tx.lock_booking(booking_id).await? {
            Some(locked) if locked.booking.user_id == requester => locked,
            _ => return Err(ReservationError::NotFound("booking not found".to_string())),
        };

        if locked.booking.status != BookingStatus::Confirmed {
            return Err(ReservationError::booking_conflict("booking is already cancelled"));
        }
        if locked.event_starts_at <= now {
            return Err(ReservationError::InvalidState(
                "cannot cancel after the show has started".to_string(),
            ));
        }

        tx.set_booking_status(booking_id, BookingStatus::Cancelled).await?;
        tx.mark_available(&locked.seat_ids).await?;
        tx.commit().await?;

        let event_id = locked.booking.event_id;
        info!(booking_id = %booking_id, event_id = %event_id, seats = locked.seat_ids.len(), "Booking cancelled");

        self.notify(
            NotificationKind::BookingCancelled,
            requester,
            json!({
                "booking_id": booking_id,
                "event_id": event_id,
                "seat_ids": locked.seat_ids,
            }),
        )
        .await;

        self.broadcast(SeatDelta::uniform(event_id, &locked.seat_ids, SeatStatus::Available))
            .await;

        Ok(CancelledBooking {
            booking_id,
            event_id,
            seat_ids: locked.seat_ids,
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn seats(&self, event_id: Uuid) -> ReservationResult<Vec<SeatView>> {
        Ok(self.ledger.event_seats(event_id).await?)
    }

    pub async fn bookings(&self, requester: &str) -> ReservationResult<Vec<BookingDetails>> {
        Ok(self.bookings.bookings_for(requester).await?)
    }

    pub async fn booking(&self, booking_id: Uuid, requester: &str) -> ReservationResult<BookingDetails> {
        self.bookings
            .booking(booking_id, requester)
            .await?
            .ok_or_else(|| ReservationError::NotFound("booking not found".to_string()))
    }

    /// Cached view of the requester's hold; absent does not prove there is none.
    pub async fn current_hold(&self, event_id: Uuid, requester: &str) -> ReservationResult<Option<HoldRecord>> {
        let now = self.clock.now();
        let record = self.locks.get_hold(event_id, requester).await?;
        Ok(record.filter(|r| r.expires_at > now))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Sorted, de-duplicated, bounded seat selection.
    fn selection(&self, seat_ids: &[Uuid]) -> ReservationResult<Vec<Uuid>> {
        if seat_ids.is_empty() {
            return Err(ReservationError::Validation(
                "at least one seat must be selected".to_string(),
            ));
        }

        let unique: BTreeSet<Uuid> = seat_ids.iter().copied().collect();
        if unique.len() > self.settings.max_seats_per_hold {
            return Err(ReservationError::Validation(format!(
                "at most {} seats can be selected at once",
                self.settings.max_seats_per_hold
            )));
        }

        Ok(unique.into_iter().collect())
    }

    async fn notify(&self, kind: NotificationKind, recipient: &str, data: serde_json::Value) {
        let job = Job::Notify(Notification {
            kind,
            recipient: recipient.to_string(),
            data,
        });
        if let Err(e) = self
            .jobs
            .schedule(job, Duration::ZERO, self.settings.notification_retry)
            .await
        {
            warn!(recipient, error = %e, "Failed to enqueue notification");
        }
    }

    async fn broadcast(&self, delta: SeatDelta) {
        if delta.is_empty() {
            return;
        }
        let event_id = delta.event_id;
        if let Err(e) = self.fanout.publish(delta).await {
            warn!(event_id = %event_id, error = %e, "Failed to broadcast seat update");
        }
    }
}
