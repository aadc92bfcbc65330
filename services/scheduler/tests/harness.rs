//! Test harness for scheduler integration tests.
//!
//! Spawns a scheduler wired to in-memory collaborators and keeps typed
//! references to each so tests can seed state and inspect recorded calls.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fleet_id::AppId;
use fleet_scheduler::collaborators::{
    InMemoryAppRepository, InMemoryHealthCheckManager, InMemoryLaunchQueue, InMemoryTaskTracker,
    MockUpgradeManager, RecordingDriver,
};
use fleet_scheduler::{
    AppDefinition, Collaborators, Scheduler, SchedulerConfig, SchedulerHandle, Task,
};

pub struct Harness {
    pub store: Arc<InMemoryAppRepository>,
    pub health: Arc<InMemoryHealthCheckManager>,
    pub tracker: Arc<InMemoryTaskTracker>,
    pub queue: Arc<InMemoryLaunchQueue>,
    pub driver: Arc<RecordingDriver>,
    pub upgrades: Arc<MockUpgradeManager>,
    pub scheduler: Scheduler,
}

impl Harness {
    /// Immediate upgrades, no periodic worker.
    pub fn new() -> Self {
        Self::build(MockUpgradeManager::new(), quiet_config())
    }

    /// Upgrades stay in flight until the test ends them.
    pub fn held_upgrades() -> Self {
        Self::build(MockUpgradeManager::held(), quiet_config())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::build(MockUpgradeManager::new(), config)
    }

    pub fn build(upgrades: MockUpgradeManager, config: SchedulerConfig) -> Self {
        let store = Arc::new(InMemoryAppRepository::new());
        let health = Arc::new(InMemoryHealthCheckManager::new());
        let tracker = Arc::new(InMemoryTaskTracker::new());
        let queue = Arc::new(InMemoryLaunchQueue::new());
        let driver = Arc::new(RecordingDriver::new());
        let upgrades = Arc::new(upgrades);

        let collaborators = Collaborators {
            store: store.clone(),
            health: health.clone(),
            tracker: tracker.clone(),
            queue: queue.clone(),
            driver: driver.clone(),
            upgrades: upgrades.clone(),
        };

        Self {
            store,
            health,
            tracker,
            queue,
            driver,
            upgrades,
            scheduler: Scheduler::start(collaborators, &config),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    /// Track `count` staged tasks for `app`.
    pub fn track(&self, app: &AppDefinition, count: usize) -> Vec<Task> {
        (0..count)
            .map(|i| {
                let task = Task::staged(app, format!("host-{i}"));
                self.tracker.track(task.clone());
                task
            })
            .collect()
    }
}

/// Default config without the periodic worker.
pub fn quiet_config() -> SchedulerConfig {
    SchedulerConfig {
        reconcile_interval: None,
        ..SchedulerConfig::default()
    }
}

pub fn app(path: &str, instances: u32) -> AppDefinition {
    AppDefinition::new(AppId::parse(path).expect("valid app id"), instances)
}

/// Fail the test if `fut` does not finish within a second.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(1), fut)
        .await
        .expect("operation did not finish in time")
}

/// Returns true if `fut` is still pending after `wait`.
pub async fn stays_pending<F: Future + Unpin>(fut: &mut F, wait: Duration) -> bool {
    tokio::time::timeout(wait, fut).await.is_err()
}
