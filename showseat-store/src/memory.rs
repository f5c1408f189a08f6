//! In-memory stores honouring the same contracts as Redis and Postgres.
//!
//! Used by the test suites of the controller and the HTTP layer. The record store
//! serialises transactions behind a single owned mutex, which is stricter than the
//! read-committed isolation the controller requires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use showseat_core::{
    Caller, LockStore, LockToken, NewReservation, RecordStore, RecordTx, Reservation, ReservationId,
    ReservationStatus, Seat, SeatId, SeatStatus, ShowtimeId, StoreError, StoreResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct LockEntry {
    token: LockToken,
    expires_at: Instant,
}

/// TTL-aware lock table. Expiry is evaluated lazily against tokio's clock, so tests
/// running with a paused clock can advance past the hold window.
#[derive(Clone, Default)]
pub struct MemoryLockStore {
    entries: Arc<Mutex<HashMap<SeatId, LockEntry>>>,
    offline: Arc<AtomicBool>,
    latency: Arc<Mutex<Duration>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before touching the table.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    pub fn holder(&self, seat_id: SeatId) -> Option<Caller> {
        self.token(seat_id).map(|token| token.caller)
    }

    /// Live token on `seat_id`, if any.
    pub fn token(&self, seat_id: SeatId) -> Option<LockToken> {
        let now = Instant::now();
        self.entries
            .lock()
            .ok()?
            .get(&seat_id)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.token.clone())
    }

    pub fn live_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    async fn round_trip(&self) -> StoreResult<()> {
        let latency = self
            .latency
            .lock()
            .map(|guard| *guard)
            .map_err(|_| StoreError::Lock("mutex poisoned".into()))?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Lock("lock store unavailable".into()));
        }
        Ok(())
    }

    fn table(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<SeatId, LockEntry>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Lock("mutex poisoned".into()))
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_claim(&self, seat_id: SeatId, token: &LockToken, ttl: Duration) -> StoreResult<bool> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut entries = self.table()?;

        if let Some(entry) = entries.get(&seat_id) {
            if entry.expires_at > now {
                return Ok(false);
            }
        }

        entries.insert(
            seat_id,
            LockEntry {
                token: token.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, seat_id: SeatId, token: &LockToken) -> StoreResult<bool> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut entries = self.table()?;

        let owned = entries
            .get(&seat_id)
            .is_some_and(|entry| entry.expires_at > now && &entry.token == token);
        if owned {
            entries.remove(&seat_id);
        }
        Ok(owned)
    }

    async fn is_locked(&self, seat_id: SeatId) -> StoreResult<bool> {
        self.round_trip().await?;
        let now = Instant::now();
        Ok(self
            .table()?
            .get(&seat_id)
            .is_some_and(|entry| entry.expires_at > now))
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    seats: HashMap<SeatId, Seat>,
    reservations: HashMap<ReservationId, Reservation>,
}

#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    tables: Arc<AsyncMutex<Tables>>,
    offline: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Create `labels` as AVAILABLE seats of `showtime_id`, returned in the given order.
    pub async fn seed_showtime(&self, showtime_id: ShowtimeId, labels: &[&str]) -> Vec<Seat> {
        let seats: Vec<Seat> = labels
            .iter()
            .map(|label| Seat::new(showtime_id, *label))
            .collect();
        let mut tables = self.tables.lock().await;
        for seat in &seats {
            tables.seats.insert(seat.id, seat.clone());
        }
        seats
    }

    pub async fn seat(&self, seat_id: SeatId) -> Option<Seat> {
        self.tables.lock().await.seats.get(&seat_id).cloned()
    }

    /// Overwrite a seat's status outside any reservation, as an operator would.
    pub async fn force_seat_status(&self, seat_id: SeatId, status: SeatStatus) {
        if let Some(seat) = self.tables.lock().await.seats.get_mut(&seat_id) {
            seat.status = status;
        }
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Record("record store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn seats_by_ids(&self, showtime_id: ShowtimeId, seat_ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        let mut seats: Vec<Seat> = seat_ids
            .iter()
            .filter_map(|id| tables.seats.get(id))
            .filter(|seat| seat.showtime_id == showtime_id)
            .cloned()
            .collect();
        seats.sort_by_key(|seat| seat.id);
        seats.dedup_by_key(|seat| seat.id);
        Ok(seats)
    }

    async fn seats_for_showtime(&self, showtime_id: ShowtimeId) -> StoreResult<Vec<Seat>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        let mut seats: Vec<Seat> = tables
            .seats
            .values()
            .filter(|seat| seat.showtime_id == showtime_id)
            .cloned()
            .collect();
        seats.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(seats)
    }

    async fn create_reservation(&self, reservation: NewReservation) -> StoreResult<Reservation> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        if tables.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Record(format!(
                "duplicate reservation id {}",
                reservation.id
            )));
        }
        let reservation = reservation.into_reservation(Utc::now());
        tables.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn get_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        self.check_online()?;
        Ok(self.tables.lock().await.reservations.get(&id).cloned())
    }

    async fn expired_pending(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Reservation>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        let mut expired: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Pending && r.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn begin(&self) -> StoreResult<Box<dyn RecordTx>> {
        self.check_online()?;
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryRecordTx { guard, working }))
    }
}

/// Writes go to a private copy and replace the shared tables on commit.
pub struct MemoryRecordTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl RecordTx for MemoryRecordTx {
    async fn reservation_for_update(&mut self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        Ok(self.working.reservations.get(&id).cloned())
    }

    async fn reserve_seats(&mut self, seat_ids: &[SeatId], reservation_id: ReservationId) -> StoreResult<u64> {
        let mut updated = 0;
        for seat_id in seat_ids {
            if let Some(seat) = self.working.seats.get_mut(seat_id) {
                if seat.status == SeatStatus::Available {
                    seat.status = SeatStatus::Reserved;
                    seat.reservation_id = Some(reservation_id);
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn release_seats(&mut self, seat_ids: &[SeatId], reservation_id: ReservationId) -> StoreResult<u64> {
        let mut updated = 0;
        for seat_id in seat_ids {
            if let Some(seat) = self.working.seats.get_mut(seat_id) {
                if seat.reservation_id.is_none() || seat.reservation_id == Some(reservation_id) {
                    seat.status = SeatStatus::Available;
                    seat.reservation_id = None;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn set_reservation_status(&mut self, id: ReservationId, status: ReservationStatus) -> StoreResult<()> {
        let reservation = self
            .working
            .reservations
            .get_mut(&id)
            .ok_or_else(|| StoreError::Record(format!("reservation {} vanished mid-transaction", id)))?;
        reservation.status = status;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryRecordTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
