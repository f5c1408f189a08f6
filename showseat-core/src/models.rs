use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::StoreError;

pub type SeatId = Uuid;
pub type ShowtimeId = Uuid;
pub type ReservationId = Uuid;

/// Verified identity of whoever is calling, as handed over by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Caller(String);

impl Caller {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Caller {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Caller {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Value stored under a seat lock. Scoped to one reservation attempt, so releasing
/// an old reservation never removes a newer claim by the same caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken {
    pub caller: Caller,
    pub reservation_id: ReservationId,
}

impl LockToken {
    pub fn new(caller: Caller, reservation_id: ReservationId) -> Self {
        Self {
            caller,
            reservation_id,
        }
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.reservation_id, self.caller)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Reserved,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Reserved => "RESERVED",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "RESERVED" => Ok(SeatStatus::Reserved),
            other => Err(StoreError::Corrupt(format!("unknown seat status {other}"))),
        }
    }
}

/// Reservation lifecycle. CONFIRMED and CANCELLED are absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    /// Only PENDING may move, and only into one of the terminal states.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Pending, ReservationStatus::Confirmed)
                | (ReservationStatus::Pending, ReservationStatus::Cancelled)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(StoreError::Corrupt(format!("unknown reservation status {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: SeatId,
    pub showtime_id: ShowtimeId,
    pub label: String,
    pub status: SeatStatus,
    /// The confirmed reservation that booked this seat, if any.
    pub reservation_id: Option<ReservationId>,
}

impl Seat {
    pub fn new(showtime_id: ShowtimeId, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            showtime_id,
            label: label.into(),
            status: SeatStatus::Available,
            reservation_id: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == SeatStatus::Available
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub caller: Caller,
    pub showtime_id: ShowtimeId,
    pub seat_ids: Vec<SeatId>,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_owned_by(&self, caller: &Caller) -> bool {
        &self.caller == caller
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Insert payload for a PENDING reservation. The seat set is fixed from here on.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: ReservationId,
    pub caller: Caller,
    pub showtime_id: ShowtimeId,
    pub seat_ids: Vec<SeatId>,
    pub expires_at: DateTime<Utc>,
}

impl NewReservation {
    pub fn into_reservation(self, created_at: DateTime<Utc>) -> Reservation {
        Reservation {
            id: self.id,
            caller: self.caller,
            showtime_id: self.showtime_id,
            seat_ids: self.seat_ids,
            status: ReservationStatus::Pending,
            expires_at: self.expires_at,
            created_at,
        }
    }
}
