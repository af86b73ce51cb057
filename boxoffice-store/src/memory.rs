//! In-process adapters with the same contracts as the Postgres and Redis
//! ones. Used by the test suites and for running the API without backends.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use boxoffice_core::pricing;
use boxoffice_core::repository::{BookingReader, LedgerTx, ReleaseScope, SeatLedger};
use boxoffice_core::services::{FailureOutcome, JobQueue, LockService, LockToken, Notifier};
use boxoffice_core::{
    Booking, BookingDetails, BookingSeat, BookingStatus, Clock, HoldRecord, Job, JobEnvelope,
    LockedBooking, Notification, RetryPolicy, SeatCategory, SeatInstance, SeatStatus, SeatView,
    StoreError,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

// ============================================================================
// Ledger
// ============================================================================

struct EventRow {
    starts_at: DateTime<Utc>,
}

struct PhysicalSeat {
    row_label: String,
    seat_number: i32,
}

#[derive(Default)]
struct LedgerState {
    events: HashMap<Uuid, EventRow>,
    seats: HashMap<Uuid, PhysicalSeat>,
    instances: HashMap<Uuid, SeatInstance>,
    bookings: HashMap<Uuid, Booking>,
    booking_seats: HashMap<Uuid, Vec<(Uuid, Decimal)>>,
}

struct LedgerShared {
    state: Mutex<LedgerState>,
    row_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

impl LedgerShared {
    /// Entries nobody holds or waits on are dropped first, so the table only
    /// tracks rows that are locked or contended.
    fn row_lock(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut row_locks = locked(&self.row_locks);
        row_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        row_locks.entry(id).or_default().clone()
    }

    async fn lock_row(&self, id: Uuid) -> Result<OwnedMutexGuard<()>, StoreError> {
        let lock = self.row_lock(id);
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::Contention(format!("lock wait timed out on row {}", id)))
    }
}

/// A seeded scheduled event and its seat-instance ids in row/number order.
#[derive(Debug, Clone)]
pub struct SeededEvent {
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
}

/// Seat and booking ledger held in memory.
///
/// Row-level exclusive locks are emulated with one async mutex per row id.
/// A transaction keeps its guards and staged writes until `commit`; dropping
/// it releases the guards and discards the writes.
#[derive(Clone)]
pub struct MemoryLedger {
    shared: Arc<LedgerShared>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(LedgerShared {
                state: Mutex::new(LedgerState::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// Provisions an event with `rows` of (label, seats in row, category),
    /// priced from `base_price`.
    pub fn seed_event(
        &self,
        starts_at: DateTime<Utc>,
        base_price: Decimal,
        rows: &[(&str, i32, SeatCategory)],
    ) -> SeededEvent {
        let event_id = Uuid::new_v4();
        let mut state = locked(&self.shared.state);
        state.events.insert(event_id, EventRow { starts_at });

        let mut seat_ids = Vec::new();
        for (row_label, count, category) in rows {
            for seat_number in 1..=*count {
                let seat_id = Uuid::new_v4();
                state.seats.insert(
                    seat_id,
                    PhysicalSeat {
                        row_label: row_label.to_string(),
                        seat_number,
                    },
                );

                let id = Uuid::new_v4();
                state.instances.insert(
                    id,
                    SeatInstance {
                        id,
                        event_id,
                        seat_id,
                        category: *category,
                        price: pricing::seat_price(base_price, *category),
                        status: SeatStatus::Available,
                        held_by: None,
                        hold_expires_at: None,
                    },
                );
                seat_ids.push(id);
            }
        }

        SeededEvent { event_id, seat_ids }
    }

    pub fn seat(&self, id: Uuid) -> Option<SeatInstance> {
        locked(&self.shared.state).instances.get(&id).cloned()
    }

    pub fn seats_of(&self, event_id: Uuid) -> Vec<SeatInstance> {
        let state = locked(&self.shared.state);
        let mut seats: Vec<SeatInstance> = state
            .instances
            .values()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect();
        seats.sort_by_key(|s| s.id);
        seats
    }

    pub fn booking_count(&self) -> usize {
        locked(&self.shared.state).bookings.len()
    }

    fn details(state: &LedgerState, booking: &Booking) -> BookingDetails {
        let event_starts_at = state
            .events
            .get(&booking.event_id)
            .map(|e| e.starts_at)
            .unwrap_or(booking.booked_at);

        let mut seats: Vec<BookingSeat> = state
            .booking_seats
            .get(&booking.id)
            .into_iter()
            .flatten()
            .filter_map(|(instance_id, price)| {
                let instance = state.instances.get(instance_id)?;
                let physical = state.seats.get(&instance.seat_id)?;
                Some(BookingSeat {
                    seat_id: *instance_id,
                    row_label: physical.row_label.clone(),
                    seat_number: physical.seat_number,
                    category: instance.category,
                    price: *price,
                })
            })
            .collect();
        seats.sort_by(|a, b| (&a.row_label, a.seat_number).cmp(&(&b.row_label, b.seat_number)));

        BookingDetails {
            booking: booking.clone(),
            event_starts_at,
            seats,
        }
    }
}

#[async_trait]
impl SeatLedger for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        Ok(Box::new(MemoryLedgerTx {
            shared: self.shared.clone(),
            guards: HashMap::new(),
            seats: HashMap::new(),
            bookings: HashMap::new(),
            booking_seats: Vec::new(),
        }))
    }

    async fn release_held(
        &self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        scope: ReleaseScope<'_>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ordered: BTreeSet<Uuid> = seat_ids.iter().copied().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for id in &ordered {
            guards.push(self.shared.lock_row(*id).await?);
        }

        let mut state = locked(&self.shared.state);
        let mut released = Vec::new();
        for id in ordered {
            let Some(seat) = state.instances.get_mut(&id) else {
                continue;
            };
            if seat.event_id != event_id || seat.status != SeatStatus::Held {
                continue;
            }
            let matches = match scope {
                ReleaseScope::ExpiredBy(cutoff) => seat.hold_expires_at.is_some_and(|at| at <= cutoff),
                ReleaseScope::Holder(holder) => seat.held_by.as_deref() == Some(holder),
            };
            if matches {
                seat.status = SeatStatus::Available;
                seat.held_by = None;
                seat.hold_expires_at = None;
                released.push(id);
            }
        }
        Ok(released)
    }

    async fn release_lapsed(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Uuid, Uuid)>, StoreError> {
        let mut candidates: Vec<(DateTime<Utc>, Uuid)> = locked(&self.shared.state)
            .instances
            .values()
            .filter(|seat| seat.status == SeatStatus::Held)
            .filter_map(|seat| seat.hold_expires_at.filter(|at| *at <= cutoff).map(|at| (at, seat.id)))
            .collect();
        candidates.sort();

        // SKIP LOCKED: a row inside another transaction waits for the next pass
        let mut guards = Vec::new();
        for (_, id) in candidates {
            if guards.len() >= limit {
                break;
            }
            if let Ok(guard) = self.shared.row_lock(id).try_lock_owned() {
                guards.push((id, guard));
            }
        }

        let mut state = locked(&self.shared.state);
        let mut released = Vec::with_capacity(guards.len());
        for (id, _guard) in &guards {
            let Some(seat) = state.instances.get_mut(id) else {
                continue;
            };
            let lapsed = seat.status == SeatStatus::Held && seat.hold_expires_at.is_some_and(|at| at <= cutoff);
            if lapsed {
                seat.status = SeatStatus::Available;
                seat.held_by = None;
                seat.hold_expires_at = None;
                released.push((seat.event_id, *id));
            }
        }
        Ok(released)
    }

    async fn event_seats(&self, event_id: Uuid) -> Result<Vec<SeatView>, StoreError> {
        let state = locked(&self.shared.state);
        let mut views: Vec<SeatView> = state
            .instances
            .values()
            .filter(|s| s.event_id == event_id)
            .filter_map(|s| {
                let physical = state.seats.get(&s.seat_id)?;
                Some(SeatView {
                    seat_id: s.id,
                    status: s.status,
                    price: s.price,
                    category: s.category,
                    row_label: physical.row_label.clone(),
                    seat_number: physical.seat_number,
                    hold_expires_at: s.hold_expires_at,
                })
            })
            .collect();
        views.sort_by(|a, b| (&a.row_label, a.seat_number).cmp(&(&b.row_label, b.seat_number)));
        Ok(views)
    }
}

#[async_trait]
impl BookingReader for MemoryLedger {
    async fn bookings_for(&self, user_id: &str) -> Result<Vec<BookingDetails>, StoreError> {
        let state = locked(&self.shared.state);
        let mut bookings: Vec<BookingDetails> = state
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .map(|b| Self::details(&state, b))
            .collect();
        bookings.sort_by(|a, b| b.booking.booked_at.cmp(&a.booking.booked_at));
        Ok(bookings)
    }

    async fn booking(
        &self,
        booking_id: Uuid,
        user_id: &str,
    ) -> Result<Option<BookingDetails>, StoreError> {
        let state = locked(&self.shared.state);
        Ok(state
            .bookings
            .get(&booking_id)
            .filter(|b| b.user_id == user_id)
            .map(|b| Self::details(&state, b)))
    }
}

pub struct MemoryLedgerTx {
    shared: Arc<LedgerShared>,
    guards: HashMap<Uuid, OwnedMutexGuard<()>>,
    /// Staged copies of locked seat rows.
    seats: HashMap<Uuid, SeatInstance>,
    /// Staged copies of locked or inserted booking rows.
    bookings: HashMap<Uuid, Booking>,
    booking_seats: Vec<(Uuid, Vec<(Uuid, Decimal)>)>,
}

impl MemoryLedgerTx {
    /// Locks `ids` in ascending order, skipping rows this transaction holds.
    async fn acquire(&mut self, ids: &[Uuid]) -> Result<(), StoreError> {
        let ordered: BTreeSet<Uuid> = ids.iter().copied().collect();
        for id in ordered {
            if self.guards.contains_key(&id) {
                continue;
            }
            let guard = self.shared.lock_row(id).await?;
            self.guards.insert(id, guard);
        }
        Ok(())
    }

    /// Locks and stages seat rows so they can be written.
    async fn stage_seats(&mut self, ids: &[Uuid]) -> Result<(), StoreError> {
        self.acquire(ids).await?;
        let state = locked(&self.shared.state);
        for id in ids {
            if self.seats.contains_key(id) {
                continue;
            }
            if let Some(seat) = state.instances.get(id) {
                self.seats.insert(*id, seat.clone());
            }
        }
        Ok(())
    }

    async fn set_seats(
        &mut self,
        ids: &[Uuid],
        status: SeatStatus,
        held_by: Option<&str>,
        hold_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.stage_seats(ids).await?;
        for id in ids {
            if let Some(seat) = self.seats.get_mut(id) {
                seat.status = status;
                seat.held_by = held_by.map(str::to_string);
                seat.hold_expires_at = hold_expires_at;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_seats(
        &mut self,
        event_id: Uuid,
        seat_ids: &[Uuid],
    ) -> Result<Vec<SeatInstance>, StoreError> {
        self.stage_seats(seat_ids).await?;

        let ordered: BTreeSet<Uuid> = seat_ids.iter().copied().collect();
        Ok(ordered
            .into_iter()
            .filter_map(|id| self.seats.get(&id))
            .filter(|seat| seat.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn mark_held(
        &mut self,
        seat_ids: &[Uuid],
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.set_seats(seat_ids, SeatStatus::Held, Some(holder), Some(expires_at))
            .await
    }

    async fn mark_sold(&mut self, seat_ids: &[Uuid]) -> Result<(), StoreError> {
        self.set_seats(seat_ids, SeatStatus::Sold, None, None).await
    }

    async fn mark_available(&mut self, seat_ids: &[Uuid]) -> Result<(), StoreError> {
        self.set_seats(seat_ids, SeatStatus::Available, None, None).await
    }

    async fn insert_booking(&mut self, booking: &Booking, seat_ids: &[Uuid]) -> Result<(), StoreError> {
        self.stage_seats(seat_ids).await?;
        let priced = seat_ids
            .iter()
            .filter_map(|id| self.seats.get(id).map(|seat| (*id, seat.price)))
            .collect();
        self.bookings.insert(booking.id, booking.clone());
        self.booking_seats.push((booking.id, priced));
        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: Uuid) -> Result<Option<LockedBooking>, StoreError> {
        self.acquire(&[booking_id]).await?;

        let state = locked(&self.shared.state);
        let Some(booking) = self
            .bookings
            .get(&booking_id)
            .or_else(|| state.bookings.get(&booking_id))
            .cloned()
        else {
            return Ok(None);
        };

        let event_starts_at = state
            .events
            .get(&booking.event_id)
            .map(|e| e.starts_at)
            .ok_or_else(|| StoreError::Corrupt(format!("booking {} has no event", booking_id)))?;

        let mut seat_ids: Vec<Uuid> = state
            .booking_seats
            .get(&booking_id)
            .into_iter()
            .flatten()
            .map(|(id, _)| *id)
            .collect();
        seat_ids.sort();
        drop(state);

        self.bookings.insert(booking_id, booking.clone());
        Ok(Some(LockedBooking {
            booking,
            event_starts_at,
            seat_ids,
        }))
    }

    async fn set_booking_status(
        &mut self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<(), StoreError> {
        if !self.bookings.contains_key(&booking_id) {
            self.lock_booking(booking_id).await?;
        }
        if let Some(booking) = self.bookings.get_mut(&booking_id) {
            booking.status = status;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = locked(&this.shared.state);
        for (id, seat) in this.seats {
            state.instances.insert(id, seat);
        }
        for (id, booking) in this.bookings {
            state.bookings.insert(id, booking);
        }
        for (id, seats) in this.booking_seats {
            state.booking_seats.insert(id, seats);
        }
        drop(state);
        drop(this.guards);
        Ok(())
    }
}

// ============================================================================
// Lock service
// ============================================================================

#[derive(Default)]
struct LockState {
    keys: HashMap<String, (String, DateTime<Utc>)>,
    holds: HashMap<(Uuid, String), (HoldRecord, DateTime<Utc>)>,
}

/// TTL key-value store driven by an injected clock.
pub struct MemoryLockService {
    clock: Arc<dyn Clock>,
    state: Mutex<LockState>,
    failing: AtomicBool,
}

impl MemoryLockService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(LockState::default()),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes every call fail as if the backing store were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let now = self.clock.now();
        locked(&self.state)
            .keys
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > now)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Cache("lock service unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let mut state = locked(&self.state);

        if let Some((_, expires_at)) = state.keys.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }

        let value = Uuid::new_v4().to_string();
        state
            .keys
            .insert(key.to_string(), (value.clone(), now + to_chrono(ttl)));
        Ok(Some(LockToken {
            key: key.to_string(),
            value,
        }))
    }

    async fn release(&self, token: &LockToken) -> Result<(), StoreError> {
        self.check()?;
        let mut state = locked(&self.state);
        if state.keys.get(&token.key).is_some_and(|(value, _)| *value == token.value) {
            state.keys.remove(&token.key);
        }
        Ok(())
    }

    async fn put_hold(&self, record: &HoldRecord, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let expires_at = self.clock.now() + to_chrono(ttl);
        locked(&self.state).holds.insert(
            (record.event_id, record.holder_id.clone()),
            (record.clone(), expires_at),
        );
        Ok(())
    }

    async fn get_hold(&self, event_id: Uuid, holder_id: &str) -> Result<Option<HoldRecord>, StoreError> {
        self.check()?;
        let now = self.clock.now();
        Ok(locked(&self.state)
            .holds
            .get(&(event_id, holder_id.to_string()))
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(record, _)| record.clone()))
    }

    async fn clear_hold(&self, event_id: Uuid, holder_id: &str) -> Result<(), StoreError> {
        self.check()?;
        locked(&self.state)
            .holds
            .remove(&(event_id, holder_id.to_string()));
        Ok(())
    }
}

// ============================================================================
// Job queue
// ============================================================================

#[derive(Default)]
struct QueueState {
    scheduled: HashMap<Uuid, JobEnvelope>,
    inflight: HashMap<Uuid, (JobEnvelope, DateTime<Utc>)>,
    dead: Vec<(JobEnvelope, String)>,
}

/// Delayed job queue on the injected clock, with the same lease and
/// dead-letter behaviour as the Redis queue.
pub struct MemoryJobQueue {
    clock: Arc<dyn Clock>,
    lease: Duration,
    state: Mutex<QueueState>,
    failing: AtomicBool,
}

impl MemoryJobQueue {
    pub fn new(clock: Arc<dyn Clock>, lease: Duration) -> Self {
        Self {
            clock,
            lease,
            state: Mutex::new(QueueState::default()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Scheduled and in-flight jobs, earliest first.
    pub fn pending(&self) -> Vec<JobEnvelope> {
        let state = locked(&self.state);
        let mut jobs: Vec<JobEnvelope> = state
            .scheduled
            .values()
            .cloned()
            .chain(state.inflight.values().map(|(envelope, _)| envelope.clone()))
            .collect();
        jobs.sort_by_key(|envelope| envelope.run_at);
        jobs
    }

    pub fn dead_letters(&self) -> Vec<(JobEnvelope, String)> {
        locked(&self.state).dead.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Queue("job queue unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn schedule(&self, job: Job, delay: Duration, policy: RetryPolicy) -> Result<Uuid, StoreError> {
        self.check()?;
        let envelope = JobEnvelope::new(job, policy, self.clock.now() + to_chrono(delay));
        let id = envelope.id;
        locked(&self.state).scheduled.insert(id, envelope);
        Ok(id)
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<JobEnvelope>, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let mut state = locked(&self.state);

        let lapsed: Vec<Uuid> = state
            .inflight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in lapsed {
            if let Some((envelope, _)) = state.inflight.remove(&id) {
                state.scheduled.insert(id, envelope);
            }
        }

        let mut due: Vec<JobEnvelope> = state
            .scheduled
            .values()
            .filter(|envelope| envelope.run_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|envelope| envelope.run_at);
        due.truncate(limit);

        let deadline = now + to_chrono(self.lease);
        for envelope in &due {
            state.scheduled.remove(&envelope.id);
            state.inflight.insert(envelope.id, (envelope.clone(), deadline));
        }
        Ok(due)
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.check()?;
        locked(&self.state).inflight.remove(&job_id);
        Ok(())
    }

    async fn fail(&self, mut envelope: JobEnvelope, reason: &str) -> Result<FailureOutcome, StoreError> {
        self.check()?;
        let now = self.clock.now();
        let mut state = locked(&self.state);
        state.inflight.remove(&envelope.id);

        match envelope.record_failure(now) {
            Some(run_at) => {
                state.scheduled.insert(envelope.id, envelope);
                Ok(FailureOutcome::Rescheduled { run_at })
            }
            None => {
                state.dead.push((envelope, reason.to_string()));
                Ok(FailureOutcome::DeadLettered)
            }
        }
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Keeps delivered notifications; can be told to fail the next few deliveries.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
    failures_left: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, times: u32) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<Notification> {
        locked(&self.delivered).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), StoreError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Channel("notification topic unavailable".to_string()));
        }
        locked(&self.delivered).push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::ManualClock;
    use rust_decimal_macros::dec;

    fn show(ledger: &MemoryLedger) -> SeededEvent {
        ledger.seed_event(
            Utc::now() + chrono::Duration::days(1),
            dec!(100),
            &[("A", 2, SeatCategory::Standard), ("B", 1, SeatCategory::Vip)],
        )
    }

    #[tokio::test]
    async fn test_seed_prices_by_category() {
        let ledger = MemoryLedger::new();
        let event = show(&ledger);
        let seats = ledger.event_seats(event.event_id).await.unwrap();

        let labels: Vec<(String, i32)> = seats.iter().map(|s| (s.row_label.clone(), s.seat_number)).collect();
        assert_eq!(labels, vec![("A".into(), 1), ("A".into(), 2), ("B".into(), 1)]);
        assert_eq!(seats[2].price, dec!(200.00));
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let ledger = MemoryLedger::new();
        let event = show(&ledger);
        let seat = event.seat_ids[0];

        let mut tx = ledger.begin().await.unwrap();
        tx.lock_seats(event.event_id, &[seat]).await.unwrap();
        tx.mark_held(&[seat], "u1", Utc::now()).await.unwrap();
        drop(tx);

        assert_eq!(ledger.seat(seat).unwrap().status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_transaction_until_timeout() {
        let ledger = MemoryLedger::with_lock_timeout(Duration::from_millis(50));
        let event = show(&ledger);
        let seat = event.seat_ids[0];

        let mut first = ledger.begin().await.unwrap();
        first.lock_seats(event.event_id, &[seat]).await.unwrap();

        let mut second = ledger.begin().await.unwrap();
        let err = second.lock_seats(event.event_id, &[seat]).await.unwrap_err();
        assert!(matches!(err, StoreError::Contention(_)));

        first.commit().await.unwrap();
        assert_eq!(second.lock_seats(event.event_id, &[seat]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lapsed_holds_released_unless_row_is_locked() {
        let ledger = MemoryLedger::new();
        let event = show(&ledger);
        let (a, b, c) = (event.seat_ids[0], event.seat_ids[1], event.seat_ids[2]);
        let now = Utc::now();

        let mut tx = ledger.begin().await.unwrap();
        tx.lock_seats(event.event_id, &[a, b, c]).await.unwrap();
        tx.mark_held(&[a, b], "u1", now - chrono::Duration::seconds(5)).await.unwrap();
        tx.mark_held(&[c], "u2", now + chrono::Duration::seconds(600)).await.unwrap();
        tx.commit().await.unwrap();

        let mut blocker = ledger.begin().await.unwrap();
        blocker.lock_seats(event.event_id, &[b]).await.unwrap();

        let released = ledger.release_lapsed(now, 10).await.unwrap();
        assert_eq!(released, vec![(event.event_id, a)]);
        assert_eq!(ledger.seat(b).unwrap().status, SeatStatus::Held);
        assert_eq!(ledger.seat(c).unwrap().status, SeatStatus::Held);

        drop(blocker);
        let released = ledger.release_lapsed(now, 10).await.unwrap();
        assert_eq!(released, vec![(event.event_id, b)]);
        assert!(ledger.release_lapsed(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_row_lock_table_forgets_released_rows() {
        let ledger = MemoryLedger::new();
        let event = show(&ledger);

        let mut tx = ledger.begin().await.unwrap();
        tx.lock_seats(event.event_id, &event.seat_ids).await.unwrap();
        for _ in 0..100 {
            tx.lock_seats(event.event_id, &[Uuid::new_v4()]).await.unwrap();
        }
        tx.commit().await.unwrap();

        // The next acquisition prunes everything nobody holds
        let mut tx = ledger.begin().await.unwrap();
        tx.lock_seats(event.event_id, &[event.seat_ids[0]]).await.unwrap();
        assert_eq!(locked(&ledger.shared.row_locks).len(), 1);
    }

    #[tokio::test]
    async fn test_lock_seats_ignores_seats_of_other_events() {
        let ledger = MemoryLedger::new();
        let event = show(&ledger);
        let other = show(&ledger);

        let mut tx = ledger.begin().await.unwrap();
        let rows = tx
            .lock_seats(event.event_id, &[event.seat_ids[0], other.seat_ids[0]])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_expires_with_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = MemoryLockService::new(clock.clone());

        let token = locks.try_acquire("k", Duration::from_secs(10)).await.unwrap();
        assert!(token.is_some());
        assert!(locks.try_acquire("k", Duration::from_secs(10)).await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(11));
        let late = locks.try_acquire("k", Duration::from_secs(10)).await.unwrap().unwrap();

        // A stale token must not release the new owner's key
        locks.release(&token.unwrap()).await.unwrap();
        assert!(locks.is_locked("k"));
        locks.release(&late).await.unwrap();
        assert!(!locks.is_locked("k"));
    }

    #[tokio::test]
    async fn test_lapsed_lease_makes_job_due_again() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = MemoryJobQueue::new(clock.clone(), Duration::from_secs(30));
        let job = Job::ReleaseSeats {
            event_id: Uuid::new_v4(),
            seat_ids: vec![Uuid::new_v4()],
            expires_at: clock.now(),
        };
        queue
            .schedule(job, Duration::from_secs(5), RetryPolicy::exponential(3, 2_000))
            .await
            .unwrap();

        assert!(queue.claim_due(10).await.unwrap().is_empty());
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(queue.claim_due(10).await.unwrap().len(), 1);
        assert!(queue.claim_due(10).await.unwrap().is_empty());

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(queue.claim_due(10).await.unwrap().len(), 1);
    }
}
