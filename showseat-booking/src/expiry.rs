use async_trait::async_trait;
use showseat_core::{ExpiryScheduler, ReservationId, StoreResult};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::service::{CancelOutcome, ReservationService};

/// In-process delayed task trigger.
///
/// Timers do not survive a restart; [`ExpirySweeper`] picks up whatever they miss,
/// which together gives at-least-once cancellation.
#[derive(Clone)]
pub struct TokioExpiryScheduler {
    service: ReservationService,
}

impl TokioExpiryScheduler {
    pub fn new(service: ReservationService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ExpiryScheduler for TokioExpiryScheduler {
    async fn schedule_cancel(&self, reservation_id: ReservationId, after: Duration) -> StoreResult<()> {
        let service = self.service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            match service.cancel_reservation(reservation_id).await {
                Ok(CancelOutcome::Cancelled) => info!("Hold on reservation {} expired", reservation_id),
                Ok(outcome) => debug!("Expiry of reservation {}: {:?}", reservation_id, outcome),
                Err(e) => error!("Expiry of reservation {} failed, left to the sweeper: {}", reservation_id, e),
            }
        });
        Ok(())
    }
}

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically cancels PENDING reservations whose hold window has passed.
pub struct ExpirySweeper {
    service: ReservationService,
    interval: Duration,
    batch_size: usize,
}

impl ExpirySweeper {
    /// Zero values are raised to the smallest usable interval and batch.
    pub fn new(service: ReservationService, interval: Duration, batch_size: usize) -> Self {
        Self {
            service,
            interval: interval.max(MIN_SWEEP_INTERVAL),
            batch_size: batch_size.max(1),
        }
    }

    /// One pass; drains in batches until a short batch comes back.
    pub async fn sweep(&self) -> usize {
        let mut total = 0;
        loop {
            match self.service.sweep_expired(self.batch_size).await {
                Ok(cancelled) => {
                    total += cancelled;
                    if cancelled < self.batch_size {
                        break;
                    }
                }
                Err(e) => {
                    error!("Expiry sweep failed: {}", e);
                    break;
                }
            }
        }
        total
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Expiry sweeper started, interval {:?}", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                let cancelled = self.sweep().await;
                if cancelled > 0 {
                    info!("Expiry sweep cancelled {} reservations", cancelled);
                }
            }
        })
    }
}
