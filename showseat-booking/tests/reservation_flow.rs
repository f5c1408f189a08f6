use async_trait::async_trait;
use chrono::{DateTime, Utc};
use showseat_booking::{BookingSettings, CancelOutcome, ExpirySweeper, ReservationService, TokioExpiryScheduler};
use showseat_core::{
    BookingError, Caller, ExpiryScheduler, LockStore, LockToken, NewReservation, RecordStore, RecordTx,
    Reservation, ReservationId, ReservationStatus, Seat, SeatId, SeatStatus, ShowtimeId,
    StoreError, StoreResult,
};
use showseat_store::{MemoryLockStore, MemoryRecordStore};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const HOLD: Duration = Duration::from_secs(600);

struct Harness {
    service: ReservationService,
    locks: MemoryLockStore,
    records: MemoryRecordStore,
    showtime: ShowtimeId,
    seats: Vec<Seat>,
}

async fn harness(labels: &[&str]) -> Harness {
    let locks = MemoryLockStore::new();
    let records = MemoryRecordStore::new();
    let showtime = Uuid::new_v4();
    let seats = records.seed_showtime(showtime, labels).await;
    let service = ReservationService::new(
        Arc::new(locks.clone()),
        Arc::new(records.clone()),
        BookingSettings {
            hold_window: HOLD,
            operation_timeout: Duration::from_secs(5),
        },
    );
    Harness {
        service,
        locks,
        records,
        showtime,
        seats,
    }
}

fn labels(seats: &[Seat]) -> Vec<String> {
    seats.iter().map(|seat| seat.label.clone()).collect()
}

#[tokio::test]
async fn test_end_to_end_lock_confirm() {
    let h = harness(&["A1", "A2", "A3"]).await;
    let alice = Caller::from("user-a");
    let bob = Caller::from("user-b");
    let (seat1, seat2) = (h.seats[0].id, h.seats[1].id);

    let reservation_id = h.service.lock_seats(&alice, h.showtime, &[seat1, seat2]).await.unwrap();

    let available = h.service.get_available_seats(h.showtime).await.unwrap();
    assert_eq!(labels(&available), vec!["A3"]);

    let pending = h.service.get_reservation(reservation_id, &alice).await.unwrap();
    assert_eq!(pending.status, ReservationStatus::Pending);
    assert!(pending.expires_at > Utc::now());

    let confirmed = h.service.confirm_reservation(reservation_id, &alice).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);

    for seat_id in [seat1, seat2] {
        let seat = h.records.seat(seat_id).await.unwrap();
        assert_eq!(seat.status, SeatStatus::Reserved);
        assert_eq!(seat.reservation_id, Some(reservation_id));
        assert!(h.locks.holder(seat_id).is_none());
    }

    let err = h.service.lock_seats(&bob, h.showtime, &[seat1]).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable));
    assert_eq!(labels(&h.service.get_available_seats(h.showtime).await.unwrap()), vec!["A3"]);
}

#[tokio::test]
async fn test_failed_claim_rolls_back_earlier_locks() {
    let h = harness(&["A", "B", "C"]).await;
    let alice = Caller::from("alice");
    let bob = Caller::from("bob");

    // Bob holds the seat that sorts last, so Alice claims the other two first
    let mut ids: Vec<SeatId> = h.seats.iter().map(|s| s.id).collect();
    ids.sort();
    h.service.lock_seats(&bob, h.showtime, &[ids[2]]).await.unwrap();

    let err = h.service.lock_seats(&alice, h.showtime, &ids).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable));

    assert!(h.locks.holder(ids[0]).is_none());
    assert!(h.locks.holder(ids[1]).is_none());
    assert_eq!(h.locks.holder(ids[2]), Some(bob));

    let available: Vec<SeatId> = h
        .service
        .get_available_seats(h.showtime)
        .await
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect();
    assert!(available.contains(&ids[0]) && available.contains(&ids[1]));
    assert!(!available.contains(&ids[2]));
}

#[tokio::test]
async fn test_unavailable_seat_fails_before_claiming() {
    let h = harness(&["A1", "A2"]).await;
    h.records.force_seat_status(h.seats[1].id, SeatStatus::Reserved).await;

    let ids: Vec<SeatId> = h.seats.iter().map(|s| s.id).collect();
    let err = h.service.lock_seats(&Caller::from("alice"), h.showtime, &ids).await.unwrap_err();

    assert!(matches!(err, BookingError::SeatUnavailable));
    assert_eq!(h.locks.live_count(), 0);
}

#[tokio::test]
async fn test_invalid_seat_sets() {
    let h = harness(&["A1"]).await;
    let alice = Caller::from("alice");

    let err = h.service.lock_seats(&alice, h.showtime, &[]).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidRequest(_)));

    let err = h
        .service
        .lock_seats(&alice, h.showtime, &[h.seats[0].id, Uuid::new_v4()])
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidRequest(_)));

    let err = h.service.lock_seats(&alice, Uuid::new_v4(), &[h.seats[0].id]).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidRequest(_)));
    assert_eq!(h.locks.live_count(), 0);

    // Duplicates collapse into one claim
    let id = h
        .service
        .lock_seats(&alice, h.showtime, &[h.seats[0].id, h.seats[0].id])
        .await
        .unwrap();
    let reservation = h.service.get_reservation(id, &alice).await.unwrap();
    assert_eq!(reservation.seat_ids, vec![h.seats[0].id]);
}

#[tokio::test]
async fn test_confirm_requires_ownership() {
    let h = harness(&["A1"]).await;
    let owner = Caller::from("owner");
    let intruder = Caller::from("intruder");
    let id = h.service.lock_seats(&owner, h.showtime, &[h.seats[0].id]).await.unwrap();

    let err = h.service.confirm_reservation(id, &intruder).await.unwrap_err();
    assert!(matches!(err, BookingError::NotYourReservation));

    let err = h.service.get_reservation(id, &intruder).await.unwrap_err();
    assert!(matches!(err, BookingError::NotYourReservation));

    let reservation = h.service.get_reservation(id, &owner).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert_eq!(h.records.seat(h.seats[0].id).await.unwrap().status, SeatStatus::Available);
}

#[tokio::test]
async fn test_confirm_is_single_shot() {
    let h = harness(&["A1"]).await;
    let owner = Caller::from("owner");
    let id = h.service.lock_seats(&owner, h.showtime, &[h.seats[0].id]).await.unwrap();

    h.service.confirm_reservation(id, &owner).await.unwrap();
    let err = h.service.confirm_reservation(id, &owner).await.unwrap_err();
    assert!(matches!(err, BookingError::AlreadyProcessed));

    let seat = h.records.seat(h.seats[0].id).await.unwrap();
    assert_eq!(seat.status, SeatStatus::Reserved);
    assert_eq!(seat.reservation_id, Some(id));
}

#[tokio::test]
async fn test_confirm_unknown_reservation() {
    let h = harness(&["A1"]).await;
    let err = h
        .service
        .confirm_reservation(Uuid::new_v4(), &Caller::from("owner"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::ReservationNotFound));
}

#[tokio::test]
async fn test_confirm_revalidates_seat_status() {
    let h = harness(&["A1", "A2"]).await;
    let owner = Caller::from("owner");
    let ids: Vec<SeatId> = h.seats.iter().map(|s| s.id).collect();
    let id = h.service.lock_seats(&owner, h.showtime, &ids).await.unwrap();

    // Seat changed underneath the advisory lock
    h.records.force_seat_status(ids[1], SeatStatus::Reserved).await;

    let err = h.service.confirm_reservation(id, &owner).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable));

    let reservation = h.service.get_reservation(id, &owner).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert_eq!(h.records.seat(ids[0]).await.unwrap().status, SeatStatus::Available);
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_never_unconfirms() {
    let h = harness(&["A1", "A2"]).await;
    let owner = Caller::from("owner");

    let pending = h.service.lock_seats(&owner, h.showtime, &[h.seats[0].id]).await.unwrap();
    assert_eq!(h.service.cancel_reservation(pending).await.unwrap(), CancelOutcome::Cancelled);
    assert_eq!(
        h.service.cancel_reservation(pending).await.unwrap(),
        CancelOutcome::Unchanged(ReservationStatus::Cancelled)
    );
    assert!(h.locks.holder(h.seats[0].id).is_none());

    let confirmed = h.service.lock_seats(&owner, h.showtime, &[h.seats[1].id]).await.unwrap();
    h.service.confirm_reservation(confirmed, &owner).await.unwrap();
    assert_eq!(
        h.service.cancel_reservation(confirmed).await.unwrap(),
        CancelOutcome::Unchanged(ReservationStatus::Confirmed)
    );
    assert_eq!(h.records.seat(h.seats[1].id).await.unwrap().status, SeatStatus::Reserved);

    assert_eq!(h.service.cancel_reservation(Uuid::new_v4()).await.unwrap(), CancelOutcome::Missing);

    // Cancelled is absorbing too
    let err = h.service.confirm_reservation(pending, &owner).await.unwrap_err();
    assert!(matches!(err, BookingError::AlreadyProcessed));
}

#[tokio::test]
async fn test_cancel_own_reservation() {
    let h = harness(&["A1"]).await;
    let owner = Caller::from("owner");
    let id = h.service.lock_seats(&owner, h.showtime, &[h.seats[0].id]).await.unwrap();

    let err = h.service.cancel_own_reservation(id, &Caller::from("other")).await.unwrap_err();
    assert!(matches!(err, BookingError::NotYourReservation));

    h.service.cancel_own_reservation(id, &owner).await.unwrap();
    let err = h.service.cancel_own_reservation(id, &owner).await.unwrap_err();
    assert!(matches!(err, BookingError::AlreadyProcessed));
    assert_eq!(labels(&h.service.get_available_seats(h.showtime).await.unwrap()), vec!["A1"]);
}

#[tokio::test(start_paused = true)]
async fn test_hold_expires_through_trigger() {
    let h = harness(&["A3"]).await;
    let owner = Caller::from("user-a");
    let seat3 = h.seats[0].id;

    let id = h.service.lock_seats(&owner, h.showtime, &[seat3]).await.unwrap();
    TokioExpiryScheduler::new(h.service.clone())
        .schedule_cancel(id, h.service.hold_window())
        .await
        .unwrap();
    assert!(h.service.get_available_seats(h.showtime).await.unwrap().is_empty());

    tokio::time::sleep(HOLD + Duration::from_secs(1)).await;
    for _ in 0..20 {
        if h.service.get_reservation(id, &owner).await.unwrap().status == ReservationStatus::Cancelled {
            break;
        }
        tokio::task::yield_now().await;
    }

    let reservation = h.service.get_reservation(id, &owner).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Cancelled);
    assert_eq!(h.records.seat(seat3).await.unwrap().status, SeatStatus::Available);
    assert_eq!(labels(&h.service.get_available_seats(h.showtime).await.unwrap()), vec!["A3"]);
}

#[tokio::test(start_paused = true)]
async fn test_late_cancel_keeps_newer_hold_by_same_caller() {
    let h = harness(&["A1"]).await;
    let alice = Caller::from("alice");
    let bob = Caller::from("bob");
    let seat = h.seats[0].id;

    let first = h.service.lock_seats(&alice, h.showtime, &[seat]).await.unwrap();
    tokio::time::advance(HOLD + Duration::from_secs(1)).await;

    // The first hold lapsed in the lock store; Alice picks the seat again
    let second = h.service.lock_seats(&alice, h.showtime, &[seat]).await.unwrap();
    assert_eq!(h.locks.token(seat), Some(LockToken::new(alice.clone(), second)));

    assert_eq!(h.service.cancel_reservation(first).await.unwrap(), CancelOutcome::Cancelled);
    assert_eq!(h.locks.token(seat), Some(LockToken::new(alice.clone(), second)));

    let err = h.service.lock_seats(&bob, h.showtime, &[seat]).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable));

    h.service.confirm_reservation(second, &alice).await.unwrap();
    assert_eq!(h.records.seat(seat).await.unwrap().reservation_id, Some(second));
}

#[tokio::test]
async fn test_out_of_range_hold_window_is_rejected() {
    let records = MemoryRecordStore::new();
    let showtime = Uuid::new_v4();
    let seats = records.seed_showtime(showtime, &["A1"]).await;
    let locks = MemoryLockStore::new();
    let service = ReservationService::new(
        Arc::new(locks.clone()),
        Arc::new(records),
        BookingSettings {
            hold_window: Duration::MAX,
            operation_timeout: Duration::from_secs(5),
        },
    );

    let err = service.lock_seats(&Caller::from("alice"), showtime, &[seats[0].id]).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidRequest(_)));
    assert_eq!(locks.live_count(), 0);
}

#[tokio::test]
async fn test_sweeper_cancels_expired_pending() {
    let locks = MemoryLockStore::new();
    let records = MemoryRecordStore::new();
    let showtime = Uuid::new_v4();
    let seats = records.seed_showtime(showtime, &["A1", "A2", "A3"]).await;
    let expired = ReservationService::new(
        Arc::new(locks.clone()),
        Arc::new(records.clone()),
        BookingSettings {
            hold_window: Duration::ZERO,
            operation_timeout: Duration::from_secs(5),
        },
    );

    let owner = Caller::from("owner");
    let first = expired.lock_seats(&owner, showtime, &[seats[0].id]).await.unwrap();
    let second = expired.lock_seats(&owner, showtime, &[seats[1].id]).await.unwrap();
    let confirmed = expired.lock_seats(&owner, showtime, &[seats[2].id]).await.unwrap();
    expired.confirm_reservation(confirmed, &owner).await.unwrap();

    let sweeper = ExpirySweeper::new(expired.clone(), Duration::from_secs(60), 1);
    assert_eq!(sweeper.sweep().await, 2);
    assert_eq!(sweeper.sweep().await, 0);

    for id in [first, second] {
        assert_eq!(
            records.get_reservation(id).await.unwrap().unwrap().status,
            ReservationStatus::Cancelled
        );
    }
    assert_eq!(
        records.get_reservation(confirmed).await.unwrap().unwrap().status,
        ReservationStatus::Confirmed
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_sweep_interval_keeps_sweeper_alive() {
    let h = harness(&["A1"]).await;
    let handle = ExpirySweeper::new(h.service.clone(), Duration::ZERO, 0).spawn();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!handle.is_finished());
    handle.abort();
}

/// Delegates to a memory lock store, but never answers a claim on one seat.
struct StallingLocks {
    inner: MemoryLockStore,
    stalled: SeatId,
}

#[async_trait]
impl LockStore for StallingLocks {
    async fn try_claim(&self, seat_id: SeatId, token: &LockToken, ttl: Duration) -> StoreResult<bool> {
        if seat_id == self.stalled {
            std::future::pending::<()>().await;
        }
        self.inner.try_claim(seat_id, token, ttl).await
    }

    async fn release(&self, seat_id: SeatId, token: &LockToken) -> StoreResult<bool> {
        self.inner.release(seat_id, token).await
    }

    async fn is_locked(&self, seat_id: SeatId) -> StoreResult<bool> {
        self.inner.is_locked(seat_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_mid_claim_runs_rollback() {
    let records = MemoryRecordStore::new();
    let showtime = Uuid::new_v4();
    let seats = records.seed_showtime(showtime, &["A1", "A2"]).await;
    let mut ids: Vec<SeatId> = seats.iter().map(|s| s.id).collect();
    ids.sort();

    let inner = MemoryLockStore::new();
    let service = ReservationService::new(
        Arc::new(StallingLocks {
            inner: inner.clone(),
            stalled: ids[1],
        }),
        Arc::new(records.clone()),
        BookingSettings {
            hold_window: HOLD,
            operation_timeout: Duration::from_millis(500),
        },
    );

    let err = service.lock_seats(&Caller::from("alice"), showtime, &ids).await.unwrap_err();
    assert!(matches!(err, BookingError::DeadlineExceeded));
    assert!(err.is_infrastructure());
    assert_eq!(inner.live_count(), 0);
}

/// Memory record store whose reservation insert always fails.
struct FailingInsert {
    inner: MemoryRecordStore,
}

#[async_trait]
impl RecordStore for FailingInsert {
    async fn seats_by_ids(&self, showtime_id: ShowtimeId, seat_ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        self.inner.seats_by_ids(showtime_id, seat_ids).await
    }

    async fn seats_for_showtime(&self, showtime_id: ShowtimeId) -> StoreResult<Vec<Seat>> {
        self.inner.seats_for_showtime(showtime_id).await
    }

    async fn create_reservation(&self, _reservation: NewReservation) -> StoreResult<Reservation> {
        Err(StoreError::Record("connection reset".into()))
    }

    async fn get_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        self.inner.get_reservation(id).await
    }

    async fn expired_pending(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Reservation>> {
        self.inner.expired_pending(now, limit).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn RecordTx>> {
        self.inner.begin().await
    }
}

#[tokio::test]
async fn test_reservation_write_failure_releases_locks() {
    let records = MemoryRecordStore::new();
    let showtime = Uuid::new_v4();
    let seats = records.seed_showtime(showtime, &["A1", "A2"]).await;
    let locks = MemoryLockStore::new();
    let service = ReservationService::new(
        Arc::new(locks.clone()),
        Arc::new(FailingInsert { inner: records }),
        BookingSettings::default(),
    );

    let ids: Vec<SeatId> = seats.iter().map(|s| s.id).collect();
    let err = service.lock_seats(&Caller::from("alice"), showtime, &ids).await.unwrap_err();
    assert!(matches!(err, BookingError::Store(StoreError::Record(_))));
    assert_eq!(locks.live_count(), 0);
}

#[tokio::test]
async fn test_lock_store_outage_surfaces_as_infrastructure() {
    let h = harness(&["A1"]).await;
    h.locks.set_offline(true);

    let err = h
        .service
        .lock_seats(&Caller::from("alice"), h.showtime, &[h.seats[0].id])
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Store(StoreError::Lock(_))));

    h.locks.set_offline(false);
    assert_eq!(h.locks.live_count(), 0);
}

/// Memory record store whose transactions never finish marking a reservation CONFIRMED.
struct StallingConfirm {
    inner: MemoryRecordStore,
}

struct StallingConfirmTx {
    inner: Box<dyn RecordTx>,
}

#[async_trait]
impl RecordTx for StallingConfirmTx {
    async fn reservation_for_update(&mut self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        self.inner.reservation_for_update(id).await
    }

    async fn reserve_seats(&mut self, seat_ids: &[SeatId], reservation_id: ReservationId) -> StoreResult<u64> {
        self.inner.reserve_seats(seat_ids, reservation_id).await
    }

    async fn release_seats(&mut self, seat_ids: &[SeatId], reservation_id: ReservationId) -> StoreResult<u64> {
        self.inner.release_seats(seat_ids, reservation_id).await
    }

    async fn set_reservation_status(&mut self, id: ReservationId, status: ReservationStatus) -> StoreResult<()> {
        if status == ReservationStatus::Confirmed {
            std::future::pending::<()>().await;
        }
        self.inner.set_reservation_status(id, status).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await
    }
}

#[async_trait]
impl RecordStore for StallingConfirm {
    async fn seats_by_ids(&self, showtime_id: ShowtimeId, seat_ids: &[SeatId]) -> StoreResult<Vec<Seat>> {
        self.inner.seats_by_ids(showtime_id, seat_ids).await
    }

    async fn seats_for_showtime(&self, showtime_id: ShowtimeId) -> StoreResult<Vec<Seat>> {
        self.inner.seats_for_showtime(showtime_id).await
    }

    async fn create_reservation(&self, reservation: NewReservation) -> StoreResult<Reservation> {
        self.inner.create_reservation(reservation).await
    }

    async fn get_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        self.inner.get_reservation(id).await
    }

    async fn expired_pending(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Reservation>> {
        self.inner.expired_pending(now, limit).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn RecordTx>> {
        Ok(Box::new(StallingConfirmTx {
            inner: self.inner.begin().await?,
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn test_confirm_deadline_rolls_back_transaction() {
    let records = MemoryRecordStore::new();
    let showtime = Uuid::new_v4();
    let seats = records.seed_showtime(showtime, &["A1", "A2"]).await;
    let locks = MemoryLockStore::new();
    let service = ReservationService::new(
        Arc::new(locks.clone()),
        Arc::new(StallingConfirm { inner: records.clone() }),
        BookingSettings {
            hold_window: HOLD,
            operation_timeout: Duration::from_millis(500),
        },
    );

    let owner = Caller::from("owner");
    let ids: Vec<SeatId> = seats.iter().map(|s| s.id).collect();
    let id = service.lock_seats(&owner, showtime, &ids).await.unwrap();

    let err = service.confirm_reservation(id, &owner).await.unwrap_err();
    assert!(matches!(err, BookingError::DeadlineExceeded));

    let reservation = service.get_reservation(id, &owner).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Pending);
    for seat_id in &ids {
        let seat = records.seat(*seat_id).await.unwrap();
        assert_eq!(seat.status, SeatStatus::Available);
        assert_eq!(seat.reservation_id, None);
        // Still held for a retry within the hold window
        assert_eq!(locks.holder(*seat_id), Some(owner.clone()));
    }
}
