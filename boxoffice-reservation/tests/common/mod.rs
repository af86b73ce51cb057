#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use uuid::Uuid;

use boxoffice_core::services::FanOut;
use boxoffice_core::{ManualClock, SeatCategory, SeatDelta, SeatStatus};
use boxoffice_reservation::{EngineParts, JobWorker, ReservationEngine, ReservationSettings, RoomHub};
use boxoffice_store::memory::SeededEvent;
use boxoffice_store::{MemoryJobQueue, MemoryLedger, MemoryLockService, RecordingNotifier};

/// Engine wired to in-memory adapters and a clock that only moves on demand.
pub struct Harness {
    pub engine: Arc<ReservationEngine>,
    pub ledger: MemoryLedger,
    pub locks: Arc<MemoryLockService>,
    pub jobs: Arc<MemoryJobQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub hub: Arc<RoomHub>,
    pub clock: Arc<ManualClock>,
    pub worker: JobWorker,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ReservationSettings::default())
    }

    pub fn with_settings(settings: ReservationSettings) -> Self {
        Self::with_parts(settings, MemoryLedger::new())
    }

    /// Wraps a pre-built ledger, e.g. one with a short lock timeout.
    pub fn with_ledger(ledger: MemoryLedger) -> Self {
        Self::with_parts(ReservationSettings::default(), ledger)
    }

    fn with_parts(settings: ReservationSettings, ledger: MemoryLedger) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = Arc::new(MemoryLockService::new(clock.clone()));
        let jobs = Arc::new(MemoryJobQueue::new(clock.clone(), Duration::from_secs(30)));
        let notifier = Arc::new(RecordingNotifier::new());
        let hub = Arc::new(RoomHub::new(64));

        let engine = Arc::new(ReservationEngine::new(
            EngineParts {
                ledger: Arc::new(ledger.clone()),
                bookings: Arc::new(ledger.clone()),
                locks: locks.clone(),
                jobs: jobs.clone(),
                fanout: hub.clone(),
                clock: clock.clone(),
            },
            settings,
        ));
        let worker = JobWorker::new(engine.clone(), jobs.clone(), notifier.clone());

        Self {
            engine,
            ledger,
            locks,
            jobs,
            notifier,
            hub,
            clock,
            worker,
        }
    }

    /// Event starting tomorrow: row A with `seats` standard seats at 100.00.
    pub fn show(&self, seats: i32) -> SeededEvent {
        self.ledger.seed_event(
            self.clock_now() + chrono::Duration::days(1),
            dec!(100),
            &[("A", seats, SeatCategory::Standard)],
        )
    }

    pub fn clock_now(&self) -> chrono::DateTime<Utc> {
        boxoffice_core::Clock::now(self.clock.as_ref())
    }

    pub fn advance(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }

    /// Joins a fresh subscriber to the event's room.
    pub async fn watch(&self, event_id: Uuid) -> mpsc::Receiver<SeatDelta> {
        let (id, rx) = self.hub.connect().await;
        self.hub.join(id, event_id).await;
        rx
    }

    pub fn status(&self, seat_id: Uuid) -> SeatStatus {
        self.ledger.seat(seat_id).map(|s| s.status).unwrap()
    }

    pub fn assert_invariant(&self, event_id: Uuid) {
        for seat in self.ledger.seats_of(event_id) {
            assert!(seat.is_consistent(), "inconsistent seat row: {:?}", seat);
        }
    }
}

/// Every delta currently queued for a subscriber.
pub fn drain(rx: &mut mpsc::Receiver<SeatDelta>) -> Vec<SeatDelta> {
    let mut deltas = Vec::new();
    while let Ok(delta) = rx.try_recv() {
        deltas.push(delta);
    }
    deltas
}

/// (seat, status) pairs of a delta, sorted by seat.
pub fn changes(delta: &SeatDelta) -> Vec<(Uuid, SeatStatus)> {
    let mut changes: Vec<(Uuid, SeatStatus)> =
        delta.seats.iter().map(|c| (c.seat_id, c.status)).collect();
    changes.sort_by_key(|(id, _)| *id);
    changes
}
