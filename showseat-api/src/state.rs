use std::sync::Arc;
use showseat_booking::ReservationService;
use showseat_core::ExpiryScheduler;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub reservations: ReservationService,
    pub expiry: Arc<dyn ExpiryScheduler>,
    pub auth: AuthConfig,
}
