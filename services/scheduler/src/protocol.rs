//! Command protocol of the scheduler.
//!
//! Every [`Command`] yields exactly one terminal outcome: its matching
//! [`Response`] on success, or a [`SchedulerError`](crate::SchedulerError).
//!
//! | Command                 | Response                 |
//! |-------------------------|--------------------------|
//! | `StartApp`              | `AppStarted(app)`        |
//! | `StopApp`               | `AppStopped(app)`        |
//! | `UpdateApp`             | `AppUpdated(id)`         |
//! | `UpgradeApp`            | `AppUpgraded(app)`       |
//! | `RollbackApp`           | `AppUpgraded(app)`       |
//! | `ScaleApp`              | `AppScaled(id)`          |
//! | `ReconcileTasks`        | `TasksReconciled`        |
//! | `ReconcileHealthChecks` | `HealthChecksReconciled` |
//! | `LaunchTasks`           | `TasksLaunched(tasks)`   |

use std::fmt;

use fleet_id::{AppId, OfferId};
use serde::{Deserialize, Serialize};

use crate::app::{AppDefinition, TaskDescriptor};

/// Capacity parameter of an upgrade.
///
/// Forwarded verbatim to the upgrade collaborator, which alone decides what
/// it bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpgradeCapacity(pub u32);

impl fmt::Display for UpgradeCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied transformation from the current definition to the next.
pub struct AppTransform(Box<dyn FnOnce(AppDefinition) -> AppDefinition + Send>);

impl AppTransform {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(AppDefinition) -> AppDefinition + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Apply the transformation.
    pub fn apply(self, current: AppDefinition) -> AppDefinition {
        (self.0)(current)
    }
}

impl fmt::Debug for AppTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppTransform(..)")
    }
}

/// A matched (offer, task) pair ready for launch.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedTask {
    pub offer_id: OfferId,
    pub task: TaskDescriptor,
}

/// Commands accepted by the scheduler.
#[derive(Debug)]
pub enum Command {
    /// Register a new application and launch its instances.
    StartApp(AppDefinition),

    /// Remove an application, kill its tasks, cancel any in-flight upgrade.
    StopApp(AppDefinition),

    /// Apply a transformation to the stored definition.
    UpdateApp { app_id: AppId, transform: AppTransform },

    /// Upgrade to a new definition via the upgrade collaborator.
    UpgradeApp {
        app: AppDefinition,
        capacity: UpgradeCapacity,
        force: bool,
    },

    /// Upgrade back to `app`, typically a previous version. Always preempts
    /// a running upgrade; `force` is carried for callers that inspect it.
    RollbackApp { app: AppDefinition, force: bool },

    /// Launch instances until the observed count reaches the desired count.
    ScaleApp(AppId),

    /// Correct drift between stored and tracked applications.
    ReconcileTasks,

    /// Re-register health checks of every stored application.
    ReconcileHealthChecks,

    /// Launch matched tasks on their offers.
    LaunchTasks(Vec<MatchedTask>),
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartApp(_) => "start_app",
            Command::StopApp(_) => "stop_app",
            Command::UpdateApp { .. } => "update_app",
            Command::UpgradeApp { .. } => "upgrade_app",
            Command::RollbackApp { .. } => "rollback_app",
            Command::ScaleApp(_) => "scale_app",
            Command::ReconcileTasks => "reconcile_tasks",
            Command::ReconcileHealthChecks => "reconcile_health_checks",
            Command::LaunchTasks(_) => "launch_tasks",
        }
    }

    /// Application the command targets, if it targets exactly one.
    pub fn app_id(&self) -> Option<&AppId> {
        match self {
            Command::StartApp(app) | Command::StopApp(app) => Some(&app.id),
            Command::UpdateApp { app_id, .. } => Some(app_id),
            Command::UpgradeApp { app, .. } | Command::RollbackApp { app, .. } => Some(&app.id),
            Command::ScaleApp(app_id) => Some(app_id),
            Command::ReconcileTasks
            | Command::ReconcileHealthChecks
            | Command::LaunchTasks(_) => None,
        }
    }
}

/// Success responses, one per command kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    AppStarted(AppDefinition),
    AppStopped(AppDefinition),
    AppUpdated(AppId),
    AppUpgraded(AppDefinition),
    AppScaled(AppId),
    TasksReconciled,
    HealthChecksReconciled,
    TasksLaunched(Vec<MatchedTask>),
}

impl Response {
    /// Short name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Response::AppStarted(_) => "app_started",
            Response::AppStopped(_) => "app_stopped",
            Response::AppUpdated(_) => "app_updated",
            Response::AppUpgraded(_) => "app_upgraded",
            Response::AppScaled(_) => "app_scaled",
            Response::TasksReconciled => "tasks_reconciled",
            Response::HealthChecksReconciled => "health_checks_reconciled",
            Response::TasksLaunched(_) => "tasks_launched",
        }
    }
}
