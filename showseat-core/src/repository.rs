use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::{
    LockToken, NewReservation, Reservation, ReservationId, ReservationStatus, Seat, SeatId,
    ShowtimeId,
};
use crate::StoreResult;

/// Fast, TTL-capable advisory lock store (Redis in production).
///
/// Entries are keyed by seat id and hold the [`LockToken`] of the claiming reservation. They shed contention
/// in front of the record store and are never the durable source of truth.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomic set-if-absent with expiry. `Ok(false)` means someone already holds the seat.
    async fn try_claim(&self, seat_id: SeatId, token: &LockToken, ttl: Duration) -> StoreResult<bool>;

    /// Delete the entry if it still holds `token`. Returns whether anything was removed.
    async fn release(&self, seat_id: SeatId, token: &LockToken) -> StoreResult<bool>;

    async fn is_locked(&self, seat_id: SeatId) -> StoreResult<bool>;
}

/// Durable, transactional store of seats and reservations (Postgres in production).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Seats of `showtime_id` among `seat_ids`. Unknown ids are simply absent from the result.
    async fn seats_by_ids(&self, showtime_id: ShowtimeId, seat_ids: &[SeatId]) -> StoreResult<Vec<Seat>>;

    async fn seats_for_showtime(&self, showtime_id: ShowtimeId) -> StoreResult<Vec<Seat>>;

    async fn create_reservation(&self, reservation: NewReservation) -> StoreResult<Reservation>;

    async fn get_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>>;

    /// PENDING reservations whose hold expired at or before `now`, oldest first.
    async fn expired_pending(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Reservation>>;

    /// Open a transaction. Dropping the returned handle without `commit` rolls it back.
    async fn begin(&self) -> StoreResult<Box<dyn RecordTx>>;
}

/// A single record-store transaction with at least read-committed isolation.
#[async_trait]
pub trait RecordTx: Send {
    /// Load a reservation and lock its row until the transaction ends.
    async fn reservation_for_update(&mut self, id: ReservationId) -> StoreResult<Option<Reservation>>;

    /// Mark seats RESERVED for `reservation_id`, touching only seats that are still AVAILABLE.
    /// Returns the number of seats updated.
    async fn reserve_seats(&mut self, seat_ids: &[SeatId], reservation_id: ReservationId) -> StoreResult<u64>;

    /// Return seats to AVAILABLE unless a different reservation booked them.
    async fn release_seats(&mut self, seat_ids: &[SeatId], reservation_id: ReservationId) -> StoreResult<u64>;

    async fn set_reservation_status(&mut self, id: ReservationId, status: ReservationStatus) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Delayed task trigger: at-least-once `cancel_reservation` after `after` has elapsed.
#[async_trait]
pub trait ExpiryScheduler: Send + Sync {
    async fn schedule_cancel(&self, reservation_id: ReservationId, after: Duration) -> StoreResult<()>;
}
