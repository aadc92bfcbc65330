//! Wiring of the coordinator, its actor and the reconcile worker.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actors::{SchedulerActor, Supervisor};
use crate::collaborators::Collaborators;
use crate::config::SchedulerConfig;
use crate::coordinator::Coordinator;
use crate::handle::SchedulerHandle;
use crate::locks::AppLocks;
use crate::worker::ReconcileWorker;

/// A running scheduler.
pub struct Scheduler {
    supervisor: Supervisor,
    handle: SchedulerHandle,
    coordinator: Arc<Coordinator>,
    worker_shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the scheduler actor and, if configured, the reconcile worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(collaborators: Collaborators, config: &SchedulerConfig) -> Self {
        let coordinator = Arc::new(Coordinator::new(collaborators, config));

        let mut supervisor = Supervisor::default();
        let actor = supervisor.spawn(SchedulerActor::new(Arc::clone(&coordinator)), config.mailbox_size);
        let handle = SchedulerHandle::new(actor, config.command_timeout);

        let (worker_shutdown, shutdown_rx) = watch::channel(false);
        let worker = config.reconcile_interval.map(|interval| {
            let worker = ReconcileWorker::new(handle.clone(), interval);
            tokio::spawn(async move { worker.run(shutdown_rx).await })
        });

        info!(
            mailbox_size = config.mailbox_size,
            reconcile_interval_secs = config.reconcile_interval.map(|d| d.as_secs()),
            start_conflict = %config.start_conflict,
            "Scheduler started"
        );

        Self {
            supervisor,
            handle,
            coordinator,
            worker_shutdown,
            worker,
        }
    }

    /// A handle for sending commands.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// The per-application lock registry.
    pub fn locks(&self) -> &Arc<AppLocks> {
        self.coordinator.locks()
    }

    /// Stop the worker and the actor. In-flight commands are aborted and
    /// their callers receive `Stopped`.
    pub async fn shutdown(mut self) {
        let _ = self.worker_shutdown.send(true);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "Reconcile worker task failed");
            }
        }
        self.supervisor.stop_all().await;
        info!("Scheduler stopped");
    }
}
