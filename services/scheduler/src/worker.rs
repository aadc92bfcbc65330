//! Periodic reconciliation worker.
//!
//! Drives `ReconcileTasks` and `ReconcileHealthChecks` through the scheduler
//! on a fixed interval.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::error::SchedulerError;
use crate::handle::SchedulerHandle;

/// Worker that periodically asks the scheduler to reconcile.
pub struct ReconcileWorker {
    scheduler: SchedulerHandle,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(scheduler: SchedulerHandle, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    /// Run until shutdown is signaled or the scheduler stops.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconcile worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(SchedulerError::Stopped) = self.run_once().await {
                        info!("Scheduler stopped, reconcile worker exiting");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single pass. Failures are logged and returned.
    pub async fn run_once(&self) -> Result<(), SchedulerError> {
        if let Err(e) = self.scheduler.reconcile_tasks().await {
            error!(error = %e, reason = e.reason_code(), "Task reconciliation failed");
            return Err(e);
        }
        if let Err(e) = self.scheduler.reconcile_health_checks().await {
            error!(error = %e, reason = e.reason_code(), "Health check reconciliation failed");
            return Err(e);
        }
        debug!("Reconciliation pass complete");
        Ok(())
    }
}
