use showseat_core::{LockStore, LockToken, SeatId};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum Compensation {
    ReleaseLock { seat_id: SeatId, token: LockToken },
}

/// Undo actions recorded while a multi-step mutation makes progress.
///
/// `run` executes them newest first. `disarm` forgets them once the mutation has
/// succeeded. If the list is dropped while still armed (the owning task was cancelled
/// or hit its deadline mid-step), the remaining actions are spawned onto the current
/// runtime so no partial lock set is left behind.
pub struct Compensations {
    locks: Arc<dyn LockStore>,
    pending: Vec<Compensation>,
}

impl Compensations {
    pub fn new(locks: Arc<dyn LockStore>) -> Self {
        Self {
            locks,
            pending: Vec::new(),
        }
    }

    pub fn release_lock(&mut self, seat_id: SeatId, token: &LockToken) {
        self.pending.push(Compensation::ReleaseLock {
            seat_id,
            token: token.clone(),
        });
    }

    /// Drop the most recent action, e.g. when the step it guarded turned out not to happen.
    pub fn forget_last(&mut self) {
        self.pending.pop();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn disarm(mut self) {
        self.pending.clear();
    }

    /// An action leaves the list only once it has finished, so if this future is
    /// dropped partway the armed `Drop` still sees the in-flight and remaining ones.
    pub async fn run(mut self) {
        while let Some(compensation) = self.pending.last().cloned() {
            apply(self.locks.as_ref(), compensation).await;
            self.pending.pop();
        }
    }
}

impl Drop for Compensations {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending);
        let locks = Arc::clone(&self.locks);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Rolling back {} seat locks from an abandoned operation", pending.len());
                handle.spawn(async move {
                    run_all(locks.as_ref(), pending).await;
                });
            }
            Err(_) => {
                warn!("No runtime to roll back {} seat locks, leaving them to expire", pending.len());
            }
        }
    }
}

async fn run_all(locks: &dyn LockStore, pending: Vec<Compensation>) {
    for compensation in pending.into_iter().rev() {
        apply(locks, compensation).await;
    }
}

async fn apply(locks: &dyn LockStore, compensation: Compensation) {
    match compensation {
        Compensation::ReleaseLock { seat_id, token } => match locks.release(seat_id, &token).await {
            Ok(true) => debug!("Released seat lock {} for {}", seat_id, token),
            Ok(false) => debug!("Seat lock {} was no longer held by {}", seat_id, token),
            // The TTL reclaims it
            Err(e) => warn!("Failed to release seat lock {}: {}", seat_id, e),
        },
    }
}
