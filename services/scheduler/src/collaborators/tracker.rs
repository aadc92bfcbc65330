//! Live task tracking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use fleet_id::AppId;

use super::record;
use crate::app::{Task, TrackedApp};

/// The scheduler's view of live tasks, grouped by application.
///
/// The coordinator only reads from the tracker and tears entries down; task
/// state itself is updated by status updates from the cluster.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    /// Live tasks of an application.
    async fn get(&self, app_id: &AppId) -> Result<Vec<Task>>;

    /// Number of live tasks of an application.
    async fn count(&self, app_id: &AppId) -> Result<u32>;

    /// Every tracked application with its tasks.
    async fn list(&self) -> Result<BTreeMap<AppId, TrackedApp>>;

    /// Forget an application's tasks (used for orphans).
    async fn expunge(&self, app_id: &AppId) -> Result<()>;

    /// Tear down an application's entry (used on stop).
    async fn shut_down(&self, app_id: &AppId) -> Result<()>;
}

/// In-memory tracker.
#[derive(Default)]
pub struct InMemoryTaskTracker {
    apps: Mutex<BTreeMap<AppId, TrackedApp>>,
    expunged: Mutex<Vec<AppId>>,
    shut_down: Mutex<Vec<AppId>>,
    fail: AtomicBool,
}

impl InMemoryTaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Record a task as live.
    pub fn track(&self, task: Task) {
        record(&self.apps)
            .entry(task.app_id.clone())
            .or_default()
            .tasks
            .push(task);
    }

    /// Returns true if the tracker holds an entry for the application.
    pub fn contains(&self, app_id: &AppId) -> bool {
        record(&self.apps).contains_key(app_id)
    }

    /// `expunge` calls, in order.
    pub fn expunged(&self) -> Vec<AppId> {
        record(&self.expunged).clone()
    }

    /// `shut_down` calls, in order.
    pub fn shut_downs(&self) -> Vec<AppId> {
        record(&self.shut_down).clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("task tracker configured to fail");
        }
        Ok(())
    }
}

#[async_trait]
impl TaskTracker for InMemoryTaskTracker {
    async fn get(&self, app_id: &AppId) -> Result<Vec<Task>> {
        self.check()?;
        Ok(record(&self.apps)
            .get(app_id)
            .map(|tracked| tracked.tasks.clone())
            .unwrap_or_default())
    }

    async fn count(&self, app_id: &AppId) -> Result<u32> {
        self.check()?;
        let count = record(&self.apps)
            .get(app_id)
            .map_or(0, |tracked| tracked.tasks.len());
        Ok(u32::try_from(count)?)
    }

    async fn list(&self) -> Result<BTreeMap<AppId, TrackedApp>> {
        self.check()?;
        Ok(record(&self.apps).clone())
    }

    async fn expunge(&self, app_id: &AppId) -> Result<()> {
        self.check()?;
        record(&self.expunged).push(app_id.clone());
        record(&self.apps).remove(app_id);
        Ok(())
    }

    async fn shut_down(&self, app_id: &AppId) -> Result<()> {
        self.check()?;
        record(&self.shut_down).push(app_id.clone());
        record(&self.apps).remove(app_id);
        Ok(())
    }
}
