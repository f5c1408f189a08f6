use showseat_booking::{ExpirySweeper, ReservationService};
use showseat_store::app_config::BookingConfig;
use tokio::task::JoinHandle;
use tracing::info;

/// Background backstop for holds whose in-process timer was lost.
pub fn start_expiry_worker(service: ReservationService, config: &BookingConfig) -> JoinHandle<()> {
    info!(
        "Expiry worker: sweeping every {}s in batches of {}",
        config.sweep_interval_seconds, config.sweep_batch_size
    );
    ExpirySweeper::new(service, config.sweep_interval(), config.sweep_batch_size).spawn()
}
