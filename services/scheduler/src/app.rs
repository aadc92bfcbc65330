//! Application and task model.
//!
//! The scheduler never owns the authoritative copy of an application; the
//! store does. These types are what flows between the coordinator and its
//! collaborators.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleet_id::{AppId, TaskId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Versions
// =============================================================================

/// Version of an application definition.
///
/// A new version is assigned on every definition change and is strictly
/// increasing per application, even when two changes land within the same
/// clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppVersion(DateTime<Utc>);

impl AppVersion {
    /// A version stamped with the current time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// A version strictly newer than `prev`.
    pub fn next_after(prev: AppVersion) -> Self {
        let floor = prev.0 + ChronoDuration::milliseconds(1);
        Self(Utc::now().max(floor))
    }

    /// Wrap an explicit timestamp.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(ts)
    }

    /// The underlying timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// =============================================================================
// Application Definition
// =============================================================================

/// Resource requirements of one task instance. Opaque to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: f64,
    pub mem_mb: f64,
    pub disk_mb: f64,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            mem_mb: 128.0,
            disk_mb: 0.0,
        }
    }
}

/// Protocol a health check speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckProtocol {
    Http,
    Tcp,
    Command,
}

/// A health check attached to an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub protocol: HealthCheckProtocol,

    /// Request path for HTTP checks, command line for command checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub grace_period_secs: u32,
    pub interval_secs: u32,
    pub max_consecutive_failures: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            protocol: HealthCheckProtocol::Http,
            path: Some("/".to_string()),
            grace_period_secs: 15,
            interval_secs: 10,
            max_consecutive_failures: 3,
        }
    }
}

/// Desired-state definition of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub id: AppId,

    /// Desired number of running instances.
    pub instances: u32,

    pub version: AppVersion,

    /// Executor that runs the tasks (`//cmd` for the default command executor).
    pub executor: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    #[serde(default)]
    pub resources: Resources,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
}

impl AppDefinition {
    /// Executor name for plain shell commands.
    pub const DEFAULT_EXECUTOR: &'static str = "//cmd";

    /// A definition with default resources and the command executor.
    pub fn new(id: AppId, instances: u32) -> Self {
        Self {
            id,
            instances,
            version: AppVersion::now(),
            executor: Self::DEFAULT_EXECUTOR.to_string(),
            cmd: None,
            resources: Resources::default(),
            env: BTreeMap::new(),
            health_checks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    #[must_use]
    pub fn with_instances(mut self, instances: u32) -> Self {
        self.instances = instances;
        self
    }

    #[must_use]
    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_checks.push(check);
        self
    }

    /// Copy of this definition stamped with a version newer than `self`'s.
    #[must_use]
    pub fn bump_version(mut self) -> Self {
        self.version = AppVersion::next_after(self.version);
        self
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// A running (or staging) instance of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub app_id: AppId,
    pub app_version: AppVersion,
    pub host: String,
    pub staged_at: DateTime<Utc>,
}

impl Task {
    /// A task freshly staged on `host`.
    pub fn staged(app: &AppDefinition, host: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            app_id: app.id.clone(),
            app_version: app.version,
            host: host.into(),
            staged_at: Utc::now(),
        }
    }
}

/// Tracker entry for one application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackedApp {
    pub tasks: Vec<Task>,
}

impl TrackedApp {
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }
}

/// A task matched to an offer by the matching collaborator, ready to launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: TaskId,
    pub app_id: AppId,
    pub host: String,
    pub resources: Resources,
}
