//! Pending launch requests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use fleet_id::AppId;

use super::record;
use crate::app::AppDefinition;

/// Queue of launch requests waiting for a matching offer.
#[async_trait]
pub trait LaunchQueue: Send + Sync {
    /// Enqueue one launch request for `app`.
    async fn add(&self, app: &AppDefinition) -> Result<()>;

    /// Drop every queued request for an application.
    async fn purge(&self, app_id: &AppId) -> Result<()>;
}

/// FIFO launch queue.
#[derive(Default)]
pub struct InMemoryLaunchQueue {
    queue: Mutex<VecDeque<AppDefinition>>,
    purges: Mutex<Vec<AppId>>,
    fail: AtomicBool,
}

impl InMemoryLaunchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Queued requests for an application.
    pub fn count(&self, app_id: &AppId) -> usize {
        record(&self.queue)
            .iter()
            .filter(|app| &app.id == app_id)
            .count()
    }

    /// Total queued requests.
    pub fn len(&self) -> usize {
        record(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        record(&self.queue).is_empty()
    }

    /// Take the oldest request, as the offer matcher would.
    pub fn poll(&self) -> Option<AppDefinition> {
        record(&self.queue).pop_front()
    }

    /// `purge` calls, in order.
    pub fn purges(&self) -> Vec<AppId> {
        record(&self.purges).clone()
    }
}

#[async_trait]
impl LaunchQueue for InMemoryLaunchQueue {
    async fn add(&self, app: &AppDefinition) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("launch queue configured to fail");
        }
        record(&self.queue).push_back(app.clone());
        Ok(())
    }

    async fn purge(&self, app_id: &AppId) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("launch queue configured to fail");
        }
        record(&self.purges).push(app_id.clone());
        record(&self.queue).retain(|app| &app.id != app_id);
        Ok(())
    }
}
