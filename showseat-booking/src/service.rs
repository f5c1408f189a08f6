use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use showseat_core::{
    BookingError, BookingResult, Caller, LockStore, LockToken, NewReservation, RecordStore, Reservation,
    ReservationId, ReservationStatus, Seat, SeatId, ShowtimeId,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compensation::Compensations;

#[derive(Debug, Clone, Copy)]
pub struct BookingSettings {
    /// Lock TTL, reservation expiry, and delay before the cancel trigger fires.
    pub hold_window: Duration,
    /// Deadline applied to each controller operation.
    pub operation_timeout: Duration,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            hold_window: Duration::from_secs(10 * 60),
            operation_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The reservation had already reached a terminal state; nothing changed.
    Unchanged(ReservationStatus),
    Missing,
}

/// Booking concurrency controller.
///
/// Lock → Confirm → Expire/Cancel across an advisory [`LockStore`] and a transactional
/// [`RecordStore`]. Holds no state of its own, so cloning it is cheap and any number of
/// requests may drive it concurrently.
#[derive(Clone)]
pub struct ReservationService {
    locks: Arc<dyn LockStore>,
    records: Arc<dyn RecordStore>,
    settings: BookingSettings,
}

impl ReservationService {
    pub fn new(locks: Arc<dyn LockStore>, records: Arc<dyn RecordStore>, settings: BookingSettings) -> Self {
        Self {
            locks,
            records,
            settings,
        }
    }

    pub fn hold_window(&self) -> Duration {
        self.settings.hold_window
    }

    /// Provisionally claim `seat_ids` of one showtime for `caller`.
    ///
    /// Either every seat ends up locked and a PENDING reservation exists, or nothing
    /// is held. Seat rows are left untouched.
    pub async fn lock_seats(
        &self,
        caller: &Caller,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
    ) -> BookingResult<ReservationId> {
        // Ascending id order across all callers bounds lock-ordering starvation
        let mut ordered = seat_ids.to_vec();
        ordered.sort();
        ordered.dedup();
        if ordered.is_empty() {
            return Err(BookingError::InvalidRequest("at least one seat is required".into()));
        }
        let expires_at = self.hold_expiry(Utc::now())?;

        // The id is fixed before any claim so each lock names this attempt
        let token = LockToken::new(caller.clone(), Uuid::new_v4());
        let mut compensations = Compensations::new(Arc::clone(&self.locks));
        let result = self
            .with_deadline(self.acquire(&token, showtime_id, &ordered, expires_at, &mut compensations))
            .await;

        match result {
            Ok(reservation_id) => {
                compensations.disarm();
                Ok(reservation_id)
            }
            Err(e) => {
                if e.is_infrastructure() {
                    error!("Lock attempt by {} aborted: {}", caller, e);
                }
                if !compensations.is_empty() {
                    info!("Lock attempt by {} failed ({}), releasing {} claims", caller, e, compensations.len());
                }
                compensations.run().await;
                Err(e)
            }
        }
    }

    async fn acquire(
        &self,
        token: &LockToken,
        showtime_id: ShowtimeId,
        seat_ids: &[SeatId],
        expires_at: DateTime<Utc>,
        compensations: &mut Compensations,
    ) -> BookingResult<ReservationId> {
        let caller = &token.caller;
        // 1. Seats must exist in this showtime and be AVAILABLE
        let seats = self.records.seats_by_ids(showtime_id, seat_ids).await?;
        if seats.len() != seat_ids.len() {
            return Err(BookingError::InvalidRequest(format!(
                "{} of {} seats are not part of showtime {}",
                seat_ids.len() - seats.len(),
                seat_ids.len(),
                showtime_id
            )));
        }
        if let Some(seat) = seats.iter().find(|seat| !seat.is_available()) {
            debug!("Seat {} of showtime {} is {}", seat.id, showtime_id, seat.status);
            return Err(BookingError::SeatUnavailable);
        }

        // 2. Claim each seat. The compensation is recorded before the round trip so a
        // deadline firing mid-claim still releases a claim that landed.
        for &seat_id in seat_ids {
            compensations.release_lock(seat_id, token);
            if !self.locks.try_claim(seat_id, token, self.settings.hold_window).await? {
                compensations.forget_last();
                warn!("Seat {} already held, {} lost the race", seat_id, caller);
                return Err(BookingError::SeatUnavailable);
            }
        }

        // 3. Durable PENDING row
        let reservation = self
            .records
            .create_reservation(NewReservation {
                id: token.reservation_id,
                caller: caller.clone(),
                showtime_id,
                seat_ids: seat_ids.to_vec(),
                expires_at,
            })
            .await
            .inspect_err(|e| error!("Failed to record reservation for {}: {}", caller, e))?;

        info!(
            "Reservation {} PENDING for {}: {} seats of showtime {}",
            reservation.id,
            caller,
            seat_ids.len(),
            showtime_id
        );
        Ok(reservation.id)
    }

    /// Finalize a PENDING reservation after the caller has paid.
    pub async fn confirm_reservation(
        &self,
        reservation_id: ReservationId,
        caller: &Caller,
    ) -> BookingResult<Reservation> {
        let reservation = self
            .with_deadline(self.commit_confirmation(reservation_id, caller))
            .await?;

        // Committed; the record store is the source of truth from here on
        self.release_locks(&reservation).await;
        Ok(reservation)
    }

    async fn commit_confirmation(
        &self,
        reservation_id: ReservationId,
        caller: &Caller,
    ) -> BookingResult<Reservation> {
        let mut tx = self.records.begin().await?;

        let mut reservation = tx
            .reservation_for_update(reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound)?;

        if !reservation.is_owned_by(caller) {
            warn!("{} tried to confirm reservation {} owned by {}", caller, reservation_id, reservation.caller);
            return Err(BookingError::NotYourReservation);
        }
        if !reservation.status.can_transition_to(ReservationStatus::Confirmed) {
            return Err(BookingError::AlreadyProcessed);
        }

        // Only AVAILABLE seats flip; a shortfall means someone else got there first
        let reserved = tx.reserve_seats(&reservation.seat_ids, reservation.id).await?;
        if reserved != reservation.seat_ids.len() as u64 {
            warn!(
                "Reservation {}: only {} of {} seats still available, rolling back",
                reservation_id,
                reserved,
                reservation.seat_ids.len()
            );
            return Err(BookingError::SeatUnavailable);
        }

        tx.set_reservation_status(reservation.id, ReservationStatus::Confirmed).await?;
        tx.commit().await?;

        reservation.status = ReservationStatus::Confirmed;
        info!("Reservation {} CONFIRMED for {}", reservation.id, caller);
        Ok(reservation)
    }

    /// Seats of a showtime that are AVAILABLE and not currently held.
    ///
    /// Not linearizable with concurrent `lock_seats`; treat the result as a hint.
    pub async fn get_available_seats(&self, showtime_id: ShowtimeId) -> BookingResult<Vec<Seat>> {
        self.with_deadline(async {
            let candidates: Vec<Seat> = self
                .records
                .seats_for_showtime(showtime_id)
                .await?
                .into_iter()
                .filter(Seat::is_available)
                .collect();

            let held = try_join_all(candidates.iter().map(|seat| self.locks.is_locked(seat.id))).await?;

            Ok::<Vec<Seat>, BookingError>(
                candidates
                    .into_iter()
                    .zip(held)
                    .filter_map(|(seat, locked)| (!locked).then_some(seat))
                    .collect(),
            )
        })
        .await
    }

    /// Release a reservation that will not be confirmed. Idempotent: repeated delivery,
    /// unknown ids, and reservations that already reached a terminal state are no-ops.
    pub async fn cancel_reservation(&self, reservation_id: ReservationId) -> BookingResult<CancelOutcome> {
        let (outcome, cancelled) = self
            .with_deadline(self.commit_cancellation(reservation_id))
            .await?;

        if let Some(reservation) = cancelled {
            self.release_locks(&reservation).await;
        }
        Ok(outcome)
    }

    async fn commit_cancellation(
        &self,
        reservation_id: ReservationId,
    ) -> BookingResult<(CancelOutcome, Option<Reservation>)> {
        let mut tx = self.records.begin().await?;

        let Some(mut reservation) = tx.reservation_for_update(reservation_id).await? else {
            debug!("Cancel for unknown reservation {}", reservation_id);
            return Ok((CancelOutcome::Missing, None));
        };

        if !reservation.status.can_transition_to(ReservationStatus::Cancelled) {
            debug!("Reservation {} already {}, cancel is a no-op", reservation_id, reservation.status);
            return Ok((CancelOutcome::Unchanged(reservation.status), None));
        }

        tx.release_seats(&reservation.seat_ids, reservation.id).await?;
        tx.set_reservation_status(reservation.id, ReservationStatus::Cancelled).await?;
        tx.commit().await?;

        reservation.status = ReservationStatus::Cancelled;
        info!("Reservation {} CANCELLED", reservation.id);
        Ok((CancelOutcome::Cancelled, Some(reservation)))
    }

    pub async fn get_reservation(&self, reservation_id: ReservationId, caller: &Caller) -> BookingResult<Reservation> {
        let reservation = self
            .with_deadline(async { Ok::<_, BookingError>(self.records.get_reservation(reservation_id).await?) })
            .await?
            .ok_or(BookingError::ReservationNotFound)?;

        if !reservation.is_owned_by(caller) {
            return Err(BookingError::NotYourReservation);
        }
        Ok(reservation)
    }

    /// User-initiated cancel. Unlike the trigger path, cancelling a finalized
    /// reservation is reported back as `AlreadyProcessed`.
    pub async fn cancel_own_reservation(&self, reservation_id: ReservationId, caller: &Caller) -> BookingResult<()> {
        self.get_reservation(reservation_id, caller).await?;

        match self.cancel_reservation(reservation_id).await? {
            CancelOutcome::Cancelled => Ok(()),
            CancelOutcome::Unchanged(_) => Err(BookingError::AlreadyProcessed),
            CancelOutcome::Missing => Err(BookingError::ReservationNotFound),
        }
    }

    /// Cancel up to `limit` PENDING reservations whose hold has run out.
    /// Returns how many were actually cancelled.
    pub async fn sweep_expired(&self, limit: usize) -> BookingResult<usize> {
        let expired = self
            .with_deadline(async { Ok::<_, BookingError>(self.records.expired_pending(Utc::now(), limit).await?) })
            .await?;

        let mut cancelled = 0;
        for reservation in expired {
            match self.cancel_reservation(reservation.id).await {
                Ok(CancelOutcome::Cancelled) => cancelled += 1,
                Ok(_) => {}
                Err(e) => error!("Sweep failed to cancel reservation {}: {}", reservation.id, e),
            }
        }
        Ok(cancelled)
    }

    fn hold_expiry(&self, now: DateTime<Utc>) -> BookingResult<DateTime<Utc>> {
        chrono::Duration::from_std(self.settings.hold_window)
            .ok()
            .and_then(|hold| now.checked_add_signed(hold))
            .ok_or_else(|| {
                error!("Hold window {:?} is out of range", self.settings.hold_window);
                BookingError::InvalidRequest("hold window is out of range".into())
            })
    }

    async fn release_locks(&self, reservation: &Reservation) {
        let token = LockToken::new(reservation.caller.clone(), reservation.id);
        let releases = reservation
            .seat_ids
            .iter()
            .map(|seat_id| self.locks.release(*seat_id, &token));

        for (seat_id, result) in reservation
            .seat_ids
            .iter()
            .zip(futures_util::future::join_all(releases).await)
        {
            if let Err(e) = result {
                // Advisory only; the TTL reclaims it
                warn!("Failed to delete seat lock {} after reservation {}: {}", seat_id, reservation.id, e);
            }
        }
    }

    async fn with_deadline<T, F>(&self, operation: F) -> BookingResult<T>
    where
        F: Future<Output = BookingResult<T>>,
    {
        tokio::time::timeout(self.settings.operation_timeout, operation)
            .await
            .map_err(|_| {
                error!("Booking operation exceeded {:?}", self.settings.operation_timeout);
                BookingError::DeadlineExceeded
            })?
    }
}
