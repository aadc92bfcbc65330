//! Client handle to a running scheduler.

use std::time::Duration;

use fleet_id::AppId;
use tokio::sync::oneshot;

use crate::actors::{ActorHandle, SchedulerMessage};
use crate::app::AppDefinition;
use crate::error::{SchedulerError, SchedulerResult};
use crate::protocol::{AppTransform, Command, MatchedTask, Response, UpgradeCapacity};

/// Sends commands to the scheduler and awaits their single outcome.
///
/// Cheap to clone; every clone talks to the same scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    actor: ActorHandle<SchedulerMessage>,
    command_timeout: Option<Duration>,
}

impl SchedulerHandle {
    pub(crate) fn new(actor: ActorHandle<SchedulerMessage>, command_timeout: Option<Duration>) -> Self {
        Self {
            actor,
            command_timeout,
        }
    }

    /// Same scheduler, different response timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Send a command and wait for its outcome.
    ///
    /// Fails with [`SchedulerError::Timeout`] if a timeout is configured and
    /// no response arrives in time, and with [`SchedulerError::Stopped`] if
    /// the scheduler is gone.
    pub async fn request(&self, command: Command) -> SchedulerResult<Response> {
        let (reply_to, rx) = oneshot::channel();
        self.actor
            .send(SchedulerMessage::Execute { command, reply_to })
            .await
            .map_err(|_| SchedulerError::Stopped)?;

        let reply = match self.command_timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx)
                .await
                .map_err(|_| SchedulerError::Timeout(timeout))?,
            None => rx.await,
        };
        reply.map_err(|_| SchedulerError::Stopped)?
    }

    /// Number of commands the scheduler is still executing.
    pub async fn in_flight(&self) -> SchedulerResult<usize> {
        let (reply_to, rx) = oneshot::channel();
        self.actor
            .send(SchedulerMessage::InFlight { reply_to })
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    pub async fn start_app(&self, app: AppDefinition) -> SchedulerResult<AppDefinition> {
        match self.request(Command::StartApp(app)).await? {
            Response::AppStarted(app) => Ok(app),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stop_app(&self, app: AppDefinition) -> SchedulerResult<AppDefinition> {
        match self.request(Command::StopApp(app)).await? {
            Response::AppStopped(app) => Ok(app),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_app<F>(&self, app_id: AppId, transform: F) -> SchedulerResult<AppId>
    where
        F: FnOnce(AppDefinition) -> AppDefinition + Send + 'static,
    {
        let command = Command::UpdateApp {
            app_id,
            transform: AppTransform::new(transform),
        };
        match self.request(command).await? {
            Response::AppUpdated(app_id) => Ok(app_id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn upgrade_app(
        &self,
        app: AppDefinition,
        capacity: UpgradeCapacity,
        force: bool,
    ) -> SchedulerResult<AppDefinition> {
        let command = Command::UpgradeApp {
            app,
            capacity,
            force,
        };
        match self.request(command).await? {
            Response::AppUpgraded(app) => Ok(app),
            other => Err(unexpected(other)),
        }
    }

    pub async fn rollback_app(&self, app: AppDefinition, force: bool) -> SchedulerResult<AppDefinition> {
        match self.request(Command::RollbackApp { app, force }).await? {
            Response::AppUpgraded(app) => Ok(app),
            other => Err(unexpected(other)),
        }
    }

    pub async fn scale_app(&self, app_id: AppId) -> SchedulerResult<AppId> {
        match self.request(Command::ScaleApp(app_id)).await? {
            Response::AppScaled(app_id) => Ok(app_id),
            other => Err(unexpected(other)),
        }
    }

    pub async fn reconcile_tasks(&self) -> SchedulerResult<()> {
        match self.request(Command::ReconcileTasks).await? {
            Response::TasksReconciled => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn reconcile_health_checks(&self) -> SchedulerResult<()> {
        match self.request(Command::ReconcileHealthChecks).await? {
            Response::HealthChecksReconciled => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn launch_tasks(&self, tasks: Vec<MatchedTask>) -> SchedulerResult<Vec<MatchedTask>> {
        match self.request(Command::LaunchTasks(tasks)).await? {
            Response::TasksLaunched(tasks) => Ok(tasks),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> SchedulerError {
    SchedulerError::UnexpectedResponse(response.name().to_string())
}
