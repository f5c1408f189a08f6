use async_trait::async_trait;
use chrono::{DateTime, Utc};
use showseat_core::{
    Caller, NewReservation, RecordStore, RecordTx, Reservation, ReservationId, ReservationStatus,
    Seat, SeatId, SeatStatus, ShowtimeId, StoreError, StoreResult,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

fn record_err(e: sqlx::Error) -> StoreError {
    StoreError::Record(e.to_string())
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct SeatRow {
    id: Uuid,
    showtime_id: Uuid,
    label: String,
    status: String,
    reservation_id: Option<Uuid>,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(Seat {
            id: row.id,
            showtime_id: row.showtime_id,
            label: row.label,
            status: row.status.parse()?,
            reservation_id: row.reservation_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    user_id: String,
    showtime_id: Uuid,
    seat_ids: Vec<Uuid>,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id,
            caller: Caller::new(row.user_id),
            showtime_id: row.showtime_id,
            seat_ids: row.seat_ids,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

const RESERVATION_COLUMNS: &str = r#"
    r.id, r.user_id, r.showtime_id, r.status, r.expires_at, r.created_at,
    ARRAY(SELECT rs.seat_id FROM reservation_seats rs WHERE rs.reservation_id = r.id ORDER BY rs.seat_id) AS seat_ids
"#;

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn seats_by_ids(&self, showtime_id: ShowtimeId, seat_ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        let rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT id, showtime_id, label, status, reservation_id
            FROM seats
            WHERE showtime_id = $1 AND id = ANY($2)
            ORDER BY id
            "#,
        )
        .bind(showtime_id)
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(record_err)?;

        rows.into_iter().map(Seat::try_from).collect()
    }

    async fn seats_for_showtime(&self, showtime_id: ShowtimeId) -> StoreResult<Vec<Seat>> {
        let rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT id, showtime_id, label, status, reservation_id
            FROM seats
            WHERE showtime_id = $1
            ORDER BY label
            "#,
        )
        .bind(showtime_id)
        .fetch_all(&self.pool)
        .await
        .map_err(record_err)?;

        rows.into_iter().map(Seat::try_from).collect()
    }

    async fn create_reservation(&self, reservation: NewReservation) -> StoreResult<Reservation> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await.map_err(record_err)?;

        sqlx::query(
            r#"
            INSERT INTO reservations (id, user_id, showtime_id, status, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.caller.as_str())
        .bind(reservation.showtime_id)
        .bind(ReservationStatus::Pending.as_str())
        .bind(reservation.expires_at)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(record_err)?;

        sqlx::query(
            r#"
            INSERT INTO reservation_seats (reservation_id, seat_id)
            SELECT $1, UNNEST($2::uuid[])
            "#,
        )
        .bind(reservation.id)
        .bind(&reservation.seat_ids)
        .execute(&mut *tx)
        .await
        .map_err(record_err)?;

        tx.commit().await.map_err(record_err)?;

        Ok(reservation.into_reservation(created_at))
    }

    async fn get_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations r WHERE r.id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(record_err)?;

        row.map(Reservation::try_from).transpose()
    }

    async fn expired_pending(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            SELECT {} FROM reservations r
            WHERE r.status = $1 AND r.expires_at <= $2
            ORDER BY r.expires_at
            LIMIT $3
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(ReservationStatus::Pending.as_str())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(record_err)?;

        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn begin(&self) -> StoreResult<Box<dyn RecordTx>> {
        let tx = self.pool.begin().await.map_err(record_err)?;
        Ok(Box::new(PgRecordTx { tx }))
    }
}

/// Postgres transaction handle. Rolled back by sqlx when dropped uncommitted.
pub struct PgRecordTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RecordTx for PgRecordTx {
    async fn reservation_for_update(&mut self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        #[derive(sqlx::FromRow)]
        struct LockedRow {
            id: Uuid,
            user_id: String,
            showtime_id: Uuid,
            status: String,
            expires_at: DateTime<Utc>,
            created_at: DateTime<Utc>,
        }

        let locked = sqlx::query_as::<_, LockedRow>(
            r#"
            SELECT id, user_id, showtime_id, status, expires_at, created_at
            FROM reservations
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(record_err)?;

        let Some(row) = locked else {
            return Ok(None);
        };

        let seat_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT seat_id FROM reservation_seats WHERE reservation_id = $1 ORDER BY seat_id",
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(record_err)?;

        Reservation::try_from(ReservationRow {
            id: row.id,
            user_id: row.user_id,
            showtime_id: row.showtime_id,
            seat_ids,
            status: row.status,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
        .map(Some)
    }

    async fn reserve_seats(&mut self, seat_ids: &[SeatId], reservation_id: ReservationId) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = $1, reservation_id = $2, updated_at = NOW()
            WHERE id = ANY($3) AND status = $4
            "#,
        )
        .bind(SeatStatus::Reserved.as_str())
        .bind(reservation_id)
        .bind(seat_ids)
        .bind(SeatStatus::Available.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(record_err)?;

        Ok(result.rows_affected())
    }

    async fn release_seats(&mut self, seat_ids: &[SeatId], reservation_id: ReservationId) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = $1, reservation_id = NULL, updated_at = NOW()
            WHERE id = ANY($2) AND (reservation_id IS NULL OR reservation_id = $3)
            "#,
        )
        .bind(SeatStatus::Available.as_str())
        .bind(seat_ids)
        .bind(reservation_id)
        .execute(&mut *self.tx)
        .await
        .map_err(record_err)?;

        Ok(result.rows_affected())
    }

    async fn set_reservation_status(&mut self, id: ReservationId, status: ReservationStatus) -> StoreResult<()> {
        sqlx::query("UPDATE reservations SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(record_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(record_err)
    }
}
