//! Error types for scheduler commands.

use std::fmt;
use std::time::Duration;

use fleet_id::AppId;
use thiserror::Error;

use crate::collaborators::UpgradeError;
use crate::locks::LockError;

/// Collaborator a failed call was made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Store,
    HealthChecks,
    TaskTracker,
    LaunchQueue,
    Driver,
    Upgrades,
}

impl Collaborator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collaborator::Store => "store",
            Collaborator::HealthChecks => "health_checks",
            Collaborator::TaskTracker => "task_tracker",
            Collaborator::LaunchQueue => "launch_queue",
            Collaborator::Driver => "driver",
            Collaborator::Upgrades => "upgrades",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for scheduler commands.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Why a command failed.
///
/// Every command either produces its success response or exactly one of
/// these. Nothing is retried at this layer.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A start was requested for an application that already exists.
    #[error("application {0} already exists")]
    AppAlreadyExists(AppId),

    /// The command needs a stored application that does not exist.
    #[error("unknown application {0}")]
    UnknownApp(AppId),

    /// A call into a collaborator failed.
    #[error("{collaborator} call failed: {source}")]
    Collaborator {
        collaborator: Collaborator,
        #[source]
        source: anyhow::Error,
    },

    /// The upgrade collaborator reported a failed or cancelled upgrade.
    #[error("upgrade of {app_id} failed: {source}")]
    UpgradeFailed {
        app_id: AppId,
        #[source]
        source: UpgradeError,
    },

    /// The application lock was not released within the configured bound.
    #[error("timed out after {waited:?} waiting for the lock on {app_id}")]
    LockTimeout { app_id: AppId, waited: Duration },

    #[error(transparent)]
    Lock(#[from] LockError),

    /// No response arrived within the caller's timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The scheduler is not running.
    #[error("scheduler stopped")]
    Stopped,

    /// The scheduler answered with a response of the wrong kind.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl SchedulerError {
    /// Wrap a collaborator failure.
    pub fn collaborator(collaborator: Collaborator, source: anyhow::Error) -> Self {
        SchedulerError::Collaborator {
            collaborator,
            source,
        }
    }

    /// Stable reason code for logs and callers.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SchedulerError::AppAlreadyExists(_) => "app_already_exists",
            SchedulerError::UnknownApp(_) => "unknown_app",
            SchedulerError::Collaborator { .. } => "collaborator_failed",
            SchedulerError::UpgradeFailed { .. } => "upgrade_failed",
            SchedulerError::LockTimeout { .. } => "lock_timeout",
            SchedulerError::Lock(_) => "lock_error",
            SchedulerError::Timeout(_) => "timeout",
            SchedulerError::Stopped => "stopped",
            SchedulerError::UnexpectedResponse(_) => "unexpected_response",
        }
    }

    /// Returns true for the start-on-existing-application conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SchedulerError::AppAlreadyExists(_))
    }
}

/// Attach a collaborator name to `anyhow` results.
pub(crate) trait CollaboratorResultExt<T> {
    fn via(self, collaborator: Collaborator) -> SchedulerResult<T>;
}

impl<T> CollaboratorResultExt<T> for anyhow::Result<T> {
    fn via(self, collaborator: Collaborator) -> SchedulerResult<T> {
        self.map_err(|source| SchedulerError::collaborator(collaborator, source))
    }
}
