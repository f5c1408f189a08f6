pub mod compensation;
pub mod expiry;
pub mod service;

pub use compensation::Compensations;
pub use expiry::{ExpirySweeper, TokioExpiryScheduler};
pub use service::{BookingSettings, CancelOutcome, ReservationService};
