use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use boxoffice_core::repository::{BookingReader, LedgerTx, ReleaseScope, SeatLedger};
use boxoffice_core::{
    Booking, BookingDetails, BookingSeat, BookingStatus, LockedBooking, SeatInstance, SeatView,
    StoreError,
};

use crate::database::{db_error, DbClient};

/// How long a transaction waits for a row lock before giving up with 55P03.
const LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '5s'";

// ============================================================================
// Row mappings
// ============================================================================

#[derive(sqlx::FromRow)]
struct SeatInstanceRow {
    id: Uuid,
    event_id: Uuid,
    seat_id: Uuid,
    category: String,
    price: Decimal,
    status: String,
    held_by: Option<String>,
    hold_expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<SeatInstanceRow> for SeatInstance {
    type Error = StoreError;

    fn try_from(row: SeatInstanceRow) -> Result<Self, Self::Error> {
        Ok(SeatInstance {
            id: row.id,
            event_id: row.event_id,
            seat_id: row.seat_id,
            category: row.category.parse()?,
            price: row.price,
            status: row.status.parse()?,
            held_by: row.held_by,
            hold_expires_at: row.hold_expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SeatViewRow {
    seat_id: Uuid,
    status: String,
    price: Decimal,
    category: String,
    row_label: String,
    seat_number: i32,
    hold_expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<SeatViewRow> for SeatView {
    type Error = StoreError;

    fn try_from(row: SeatViewRow) -> Result<Self, Self::Error> {
        Ok(SeatView {
            seat_id: row.seat_id,
            status: row.status.parse()?,
            price: row.price,
            category: row.category.parse()?,
            row_label: row.row_label,
            seat_number: row.seat_number,
            hold_expires_at: row.hold_expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    event_id: Uuid,
    user_id: String,
    total_amount: Decimal,
    status: String,
    payment_ref: String,
    booked_at: DateTime<Utc>,
    event_starts_at: DateTime<Utc>,
}

impl BookingRow {
    fn split(self) -> Result<(Booking, DateTime<Utc>), StoreError> {
        let booking = Booking {
            id: self.id,
            event_id: self.event_id,
            user_id: self.user_id,
            total_amount: self.total_amount,
            status: self.status.parse()?,
            payment_ref: self.payment_ref,
            booked_at: self.booked_at,
        };
        Ok((booking, self.event_starts_at))
    }
}

#[derive(sqlx::FromRow)]
struct BookingSeatRow {
    booking_id: Uuid,
    seat_id: Uuid,
    row_label: String,
    seat_number: i32,
    category: String,
    price: Decimal,
}

const SELECT_BOOKING: &str = r#"
    SELECT b.id, b.event_id, b.user_id, b.total_amount, b.status, b.payment_ref, b.booked_at,
           e.starts_at AS event_starts_at
    FROM bookings b
    JOIN scheduled_events e ON e.id = b.event_id
"#;

// ============================================================================
// Seat ledger
// ============================================================================

/// Seat and booking ledger on Postgres. Exclusivity comes from
/// `SELECT ... FOR UPDATE` on the exact rows touched.
#[derive(Clone)]
pub struct PgSeatLedger {
    pool: Pool<Postgres>,
}

impl PgSeatLedger {
    pub fn new(db: &DbClient) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }
}

#[async_trait]
impl SeatLedger for PgSeatLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query(LOCK_TIMEOUT)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn release_held(
        &self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        scope: ReleaseScope<'_>,
    ) -> Result<Vec<Uuid>, StoreError> {
        // Single conditional statement; a sold or re-held row never matches.
        let released: Vec<(Uuid,)> = match scope {
            ReleaseScope::ExpiredBy(expires_at) => {
                sqlx::query_as::<_, (Uuid,)>(
                    r#"
                    UPDATE seat_instances
                    SET status = 'available', held_by = NULL, hold_expires_at = NULL
                    WHERE event_id = $1 AND id = ANY($2)
                      AND status = 'held' AND hold_expires_at <= $3
                    RETURNING id
                    "#,
                )
                .bind(event_id)
                .bind(seat_ids)
                .bind(expires_at)
                .fetch_all(&self.pool)
                .await
            }
            ReleaseScope::Holder(holder) => {
                sqlx::query_as::<_, (Uuid,)>(
                    r#"
                    UPDATE seat_instances
                    SET status = 'available', held_by = NULL, hold_expires_at = NULL
                    WHERE event_id = $1 AND id = ANY($2)
                      AND status = 'held' AND held_by = $3
                    RETURNING id
                    "#,
                )
                .bind(event_id)
                .bind(seat_ids)
                .bind(holder)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(db_error)?;

        let mut ids: Vec<Uuid> = released.into_iter().map(|(id,)| id).collect();
        ids.sort();
        Ok(ids)
    }

    async fn release_lapsed(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(Uuid, Uuid)>, StoreError> {
        // Walks idx_seat_instances_hold_expiry; rows mid-transaction are left for the next pass
        let released: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            UPDATE seat_instances
            SET status = 'available', held_by = NULL, hold_expires_at = NULL
            WHERE id IN (
                SELECT id FROM seat_instances
                WHERE status = 'held' AND hold_expires_at <= $1
                ORDER BY hold_expires_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'held' AND hold_expires_at <= $1
            RETURNING event_id, id
            "#,
        )
        .bind(cutoff)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(released)
    }

    async fn event_seats(&self, event_id: Uuid) -> Result<Vec<SeatView>, StoreError> {
        let rows: Vec<SeatViewRow> = sqlx::query_as(
            r#"
            SELECT si.id AS seat_id, si.status, si.price, si.category,
                   s.row_label, s.seat_number, si.hold_expires_at
            FROM seat_instances si
            JOIN seats s ON s.id = si.seat_id
            WHERE si.event_id = $1
            ORDER BY s.row_label, s.seat_number
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(SeatView::try_from).collect()
    }
}

#[async_trait]
impl BookingReader for PgSeatLedger {
    async fn bookings_for(&self, user_id: &str) -> Result<Vec<BookingDetails>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "{} WHERE b.user_id = $1 ORDER BY b.booked_at DESC",
            SELECT_BOOKING
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let mut seats = self.booking_seats(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let (booking, event_starts_at) = row.split()?;
                let seats = seats.remove(&booking.id).unwrap_or_default();
                Ok(BookingDetails {
                    booking,
                    event_starts_at,
                    seats,
                })
            })
            .collect()
    }

    async fn booking(
        &self,
        booking_id: Uuid,
        user_id: &str,
    ) -> Result<Option<BookingDetails>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "{} WHERE b.id = $1 AND b.user_id = $2",
            SELECT_BOOKING
        ))
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let (booking, event_starts_at) = row.split()?;
        let seats = self
            .booking_seats(&[booking.id])
            .await?
            .remove(&booking.id)
            .unwrap_or_default();

        Ok(Some(BookingDetails {
            booking,
            event_starts_at,
            seats,
        }))
    }
}

impl PgSeatLedger {
    async fn booking_seats(
        &self,
        booking_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<BookingSeat>>, StoreError> {
        if booking_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<BookingSeatRow> = sqlx::query_as(
            r#"
            SELECT bs.booking_id, si.id AS seat_id, s.row_label, s.seat_number,
                   si.category, bs.price
            FROM booking_seats bs
            JOIN seat_instances si ON si.id = bs.seat_instance_id
            JOIN seats s ON s.id = si.seat_id
            WHERE bs.booking_id = ANY($1)
            ORDER BY s.row_label, s.seat_number
            "#,
        )
        .bind(booking_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut grouped: HashMap<Uuid, Vec<BookingSeat>> = HashMap::new();
        for row in rows {
            grouped.entry(row.booking_id).or_default().push(BookingSeat {
                seat_id: row.seat_id,
                row_label: row.row_label,
                seat_number: row.seat_number,
                category: row.category.parse()?,
                price: row.price,
            });
        }
        Ok(grouped)
    }
}

// ============================================================================
// Transaction
// ============================================================================

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_seats(
        &mut self,
        event_id: Uuid,
        seat_ids: &[Uuid],
    ) -> Result<Vec<SeatInstance>, StoreError> {
        // Fixed lock order across transactions keeps overlapping selections deadlock-free
        let rows: Vec<SeatInstanceRow> = sqlx::query_as(
            r#"
            SELECT id, event_id, seat_id, category, price, status, held_by, hold_expires_at
            FROM seat_instances
            WHERE event_id = $1 AND id = ANY($2)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(event_id)
        .bind(seat_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        debug!(event_id = %event_id, requested = seat_ids.len(), locked = rows.len(), "Locked seat rows");
        rows.into_iter().map(SeatInstance::try_from).collect()
    }

    async fn mark_held(
        &mut self,
        seat_ids: &[Uuid],
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE seat_instances SET status = 'held', held_by = $2, hold_expires_at = $3 WHERE id = ANY($1)",
        )
        .bind(seat_ids)
        .bind(holder)
        .bind(expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn mark_sold(&mut self, seat_ids: &[Uuid]) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE seat_instances SET status = 'sold', held_by = NULL, hold_expires_at = NULL WHERE id = ANY($1)",
        )
        .bind(seat_ids)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn mark_available(&mut self, seat_ids: &[Uuid]) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE seat_instances SET status = 'available', held_by = NULL, hold_expires_at = NULL WHERE id = ANY($1)",
        )
        .bind(seat_ids)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking, seat_ids: &[Uuid]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, event_id, user_id, total_amount, status, payment_ref, booked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(booking.id)
        .bind(booking.event_id)
        .bind(&booking.user_id)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(&booking.payment_ref)
        .bind(booking.booked_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO booking_seats (booking_id, seat_instance_id, price)
            SELECT $1, id, price FROM seat_instances WHERE id = ANY($2)
            "#,
        )
        .bind(booking.id)
        .bind(seat_ids)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: Uuid) -> Result<Option<LockedBooking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "{} WHERE b.id = $1 FOR UPDATE OF b",
            SELECT_BOOKING
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let seat_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT seat_instance_id FROM booking_seats WHERE booking_id = $1 ORDER BY seat_instance_id",
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let (booking, event_starts_at) = row.split()?;
        Ok(Some(LockedBooking {
            booking,
            event_starts_at,
            seat_ids: seat_ids.into_iter().map(|(id,)| id).collect(),
        }))
    }

    async fn set_booking_status(
        &mut self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE bookings SET status = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_error)
    }
}
