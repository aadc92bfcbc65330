//! Collaborator contracts consumed by the coordinator.
//!
//! Each collaborator is an async trait object so the coordinator can be wired
//! to real backends or to the in-memory implementations that live next to
//! each trait. The in-memory implementations record every call and support
//! failure injection; they back the tests and local development.
//!
//! - [`AppRepository`]: durable application definitions
//! - [`HealthCheckManager`]: health-check registration
//! - [`TaskTracker`]: live tasks per application
//! - [`LaunchQueue`]: pending launch requests
//! - [`SchedulerDriver`]: kill and launch on the cluster
//! - [`UpgradeManager`]: multi-step upgrade execution and its cancellation

mod driver;
mod health;
mod queue;
mod store;
mod tracker;
mod upgrade;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use driver::{LaunchCall, RecordingDriver, SchedulerDriver};
pub use health::{HealthCheckManager, InMemoryHealthCheckManager};
pub use queue::{InMemoryLaunchQueue, LaunchQueue};
pub use store::{AppRepository, InMemoryAppRepository};
pub use tracker::{InMemoryTaskTracker, TaskTracker};
pub use upgrade::{MockUpgradeManager, UpgradeError, UpgradeManager, UpgradeRequest};

/// The full set of collaborators a coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn AppRepository>,
    pub health: Arc<dyn HealthCheckManager>,
    pub tracker: Arc<dyn TaskTracker>,
    pub queue: Arc<dyn LaunchQueue>,
    pub driver: Arc<dyn SchedulerDriver>,
    pub upgrades: Arc<dyn UpgradeManager>,
}

/// Lock a mock's bookkeeping; records stay usable after a panicking test thread.
pub(crate) fn record<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
