//! Cluster execution driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use fleet_id::{OfferId, TaskId};
use tracing::info;

use super::record;
use crate::app::TaskDescriptor;

/// Interface to the resource manager that actually runs tasks.
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Request a task kill. Returns once the request is issued, not fulfilled.
    async fn kill_task(&self, task_id: &TaskId) -> Result<()>;

    /// Launch `tasks` using the resources of `offer_ids`.
    async fn launch_tasks(&self, offer_ids: Vec<OfferId>, tasks: Vec<TaskDescriptor>) -> Result<()>;
}

/// A launch call as seen by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchCall {
    pub offer_ids: Vec<OfferId>,
    pub tasks: Vec<TaskDescriptor>,
}

/// Driver that records requests instead of talking to a cluster.
#[derive(Default)]
pub struct RecordingDriver {
    kills: Mutex<Vec<TaskId>>,
    launches: Mutex<Vec<LaunchCall>>,
    fail: AtomicBool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver that rejects every call.
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Kill requests issued so far, in order.
    pub fn kills(&self) -> Vec<TaskId> {
        record(&self.kills).clone()
    }

    /// Launch calls issued so far, in order.
    pub fn launches(&self) -> Vec<LaunchCall> {
        record(&self.launches).clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("driver configured to fail");
        }
        Ok(())
    }
}

#[async_trait]
impl SchedulerDriver for RecordingDriver {
    async fn kill_task(&self, task_id: &TaskId) -> Result<()> {
        self.check()?;
        info!(task_id = %task_id, "[RECORDING] kill task");
        record(&self.kills).push(*task_id);
        Ok(())
    }

    async fn launch_tasks(&self, offer_ids: Vec<OfferId>, tasks: Vec<TaskDescriptor>) -> Result<()> {
        self.check()?;
        info!(
            offers = offer_ids.len(),
            tasks = tasks.len(),
            "[RECORDING] launch tasks"
        );
        record(&self.launches).push(LaunchCall { offer_ids, tasks });
        Ok(())
    }
}
