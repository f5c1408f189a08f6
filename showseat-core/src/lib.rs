pub mod models;
pub mod repository;

pub use models::{
    Caller, LockToken, NewReservation, Reservation, ReservationId, ReservationStatus, Seat, SeatId,
    SeatStatus, ShowtimeId,
};
pub use repository::{ExpiryScheduler, LockStore, RecordStore, RecordTx};

/// Failure of a backing store (Postgres, Redis, or an in-memory fake).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Record store error: {0}")]
    Record(String),
    #[error("Lock store error: {0}")]
    Lock(String),
    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("One or more seats are unavailable")]
    SeatUnavailable,
    #[error("Reservation not found")]
    ReservationNotFound,
    #[error("Reservation belongs to another user")]
    NotYourReservation,
    #[error("Reservation already processed")]
    AlreadyProcessed,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Operation deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Store outages and deadlines, as opposed to caller-level outcomes.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, BookingError::Store(_) | BookingError::DeadlineExceeded)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type BookingResult<T> = Result<T, BookingError>;
