//! The scheduling coordinator.
//!
//! Translates each [`Command`] into calls on the collaborators under the
//! per-application locking discipline, and produces exactly one outcome per
//! command. The coordinator is stateless between commands apart from the lock
//! registry; it is shared behind an `Arc` and every command runs as its own
//! future, so a command suspended on a collaborator or a lock never holds up
//! another.
//!
//! Lock usage per command:
//!
//! - start, update, scale: hold the lock for the whole command, waiting if
//!   it is held
//! - stop: cancel the in-flight upgrade if the lock is held, then wait for it
//!   ahead of every other waiter
//! - upgrade: wait (`force = false`) or cancel then wait ahead of unforced
//!   waiters (`force = true`), then hand the lock to the upgrade collaborator
//! - rollback: like a forced upgrade
//! - reconcile: never waits; an application whose lock is held is neither
//!   counted nor topped up on that pass
//! - launch: no lock

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_id::AppId;
use fleet_reconcile::{shortfall, StoredApp};
use tracing::{debug, info, instrument, warn};

use crate::app::{AppDefinition, AppVersion};
use crate::collaborators::{Collaborators, UpgradeRequest};
use crate::config::{SchedulerConfig, StartConflictPolicy};
use crate::error::{Collaborator, CollaboratorResultExt, SchedulerError, SchedulerResult};
use crate::locks::{AppLockGuard, AppLocks, LockClaim, LockError, LockPriority};
use crate::protocol::{AppTransform, Command, MatchedTask, Response, UpgradeCapacity};

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub apps_checked: usize,
    pub orphans_removed: usize,
    pub tasks_killed: usize,
    pub launches_enqueued: u64,
    /// Applications whose shortfall was skipped because their lock was held.
    pub apps_skipped: usize,
    pub over_provisioned: usize,
}

/// Command handlers.
pub struct Coordinator {
    collaborators: Collaborators,
    locks: Arc<AppLocks>,
    lock_wait_timeout: Option<Duration>,
    start_conflict: StartConflictPolicy,
}

impl Coordinator {
    pub fn new(collaborators: Collaborators, config: &SchedulerConfig) -> Self {
        Self {
            collaborators,
            locks: Arc::new(AppLocks::new()),
            lock_wait_timeout: config.lock_wait_timeout,
            start_conflict: config.start_conflict,
        }
    }

    /// The lock registry this coordinator serializes on.
    pub fn locks(&self) -> &Arc<AppLocks> {
        &self.locks
    }

    /// Run one command to its terminal outcome.
    pub async fn execute(&self, command: Command) -> SchedulerResult<Response> {
        let name = command.name();
        let app_id = command.app_id().cloned();

        let result = match command {
            Command::StartApp(app) => self.start_app(app).await,
            Command::StopApp(app) => self.stop_app(app).await,
            Command::UpdateApp { app_id, transform } => self.update_app(app_id, transform).await,
            Command::UpgradeApp {
                app,
                capacity,
                force,
            } => self.upgrade_app(app, capacity, force).await,
            Command::RollbackApp { app, force } => self.rollback_app(app, force).await,
            Command::ScaleApp(app_id) => self.scale_app(app_id).await,
            Command::ReconcileTasks => self.reconcile_tasks().await.map(|_| Response::TasksReconciled),
            Command::ReconcileHealthChecks => self.reconcile_health_checks().await,
            Command::LaunchTasks(tasks) => self.launch_tasks(tasks).await,
        };

        if let Err(err) = &result {
            warn!(
                command = name,
                app_id = ?app_id.as_ref().map(AppId::as_str),
                reason = err.reason_code(),
                error = %err,
                "Command failed"
            );
        }
        result
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[instrument(skip(self, app), fields(app_id = %app.id, instances = app.instances))]
    async fn start_app(&self, app: AppDefinition) -> SchedulerResult<Response> {
        let _guard = self.lock(&app.id).await?;
        let store = &self.collaborators.store;

        let app = match store.current_version(&app.id).await.via(Collaborator::Store)? {
            None => app,
            Some(existing) => match self.start_conflict {
                StartConflictPolicy::Reject => {
                    return Err(SchedulerError::AppAlreadyExists(app.id));
                }
                StartConflictPolicy::Overwrite => {
                    info!(previous = %existing.version, "Overwriting existing application");
                    if app.version <= existing.version {
                        AppDefinition {
                            version: AppVersion::next_after(existing.version),
                            ..app
                        }
                    } else {
                        app
                    }
                }
            },
        };

        let stored = store.store(app).await.via(Collaborator::Store)?;
        self.collaborators
            .health
            .reconcile_with(&stored)
            .await
            .via(Collaborator::HealthChecks)?;

        // Count after persisting so the freshest tracker state is used.
        let live = self.live_count(&stored.id).await?;
        let missing = shortfall(stored.instances, live);
        self.enqueue(&stored, missing).await?;

        info!(version = %stored.version, enqueued = missing, "App started");
        Ok(Response::AppStarted(stored))
    }

    #[instrument(skip(self, app), fields(app_id = %app.id))]
    async fn stop_app(&self, app: AppDefinition) -> SchedulerResult<Response> {
        let _guard = self.preempt(&app.id, LockPriority::Stop).await?;
        let c = &self.collaborators;

        let existed = c.store.expunge(&app.id).await.via(Collaborator::Store)?;
        c.health
            .remove_all_for(&app.id)
            .await
            .via(Collaborator::HealthChecks)?;

        let tasks = c.tracker.get(&app.id).await.via(Collaborator::TaskTracker)?;
        for task in &tasks {
            debug!(task_id = %task.id, "Killing task");
            c.driver.kill_task(&task.id).await.via(Collaborator::Driver)?;
        }

        c.queue.purge(&app.id).await.via(Collaborator::LaunchQueue)?;
        c.tracker
            .shut_down(&app.id)
            .await
            .via(Collaborator::TaskTracker)?;

        info!(existed, tasks_killed = tasks.len(), "App stopped");
        Ok(Response::AppStopped(app))
    }

    #[instrument(skip(self, transform))]
    async fn update_app(&self, app_id: AppId, transform: AppTransform) -> SchedulerResult<Response> {
        let _guard = self.lock(&app_id).await?;
        let c = &self.collaborators;

        let current = c
            .store
            .current_version(&app_id)
            .await
            .via(Collaborator::Store)?
            .ok_or_else(|| SchedulerError::UnknownApp(app_id.clone()))?;
        let previous = current.version;

        // The application keeps its identity whatever the transform returns.
        let next = AppDefinition {
            id: app_id.clone(),
            version: AppVersion::next_after(previous),
            ..transform.apply(current)
        };

        c.health
            .reconcile_with(&next)
            .await
            .via(Collaborator::HealthChecks)?;
        let stored = c.store.store(next).await.via(Collaborator::Store)?;

        info!(previous = %previous, version = %stored.version, "App updated");
        Ok(Response::AppUpdated(app_id))
    }

    #[instrument(skip(self, app, capacity), fields(app_id = %app.id, capacity = %capacity))]
    async fn upgrade_app(
        &self,
        app: AppDefinition,
        capacity: UpgradeCapacity,
        force: bool,
    ) -> SchedulerResult<Response> {
        let lock = if force {
            self.preempt(&app.id, LockPriority::Forced).await?
        } else {
            self.lock(&app.id).await?
        };

        let request = UpgradeRequest {
            app: app.clone(),
            capacity,
            lock,
        };
        self.collaborators
            .upgrades
            .upgrade(request)
            .await
            .map_err(|source| SchedulerError::UpgradeFailed {
                app_id: app.id.clone(),
                source,
            })?;

        info!(version = %app.version, "App upgraded");
        Ok(Response::AppUpgraded(app))
    }

    /// A rollback is a forced upgrade to the target definition; the capacity
    /// is the target's instance count.
    #[instrument(skip(self, app), fields(app_id = %app.id, version = %app.version))]
    async fn rollback_app(&self, app: AppDefinition, force: bool) -> SchedulerResult<Response> {
        if !force {
            debug!("Rollback always preempts a running upgrade");
        }
        let capacity = UpgradeCapacity(app.instances);
        self.upgrade_app(app, capacity, true).await
    }

    #[instrument(skip(self))]
    async fn scale_app(&self, app_id: AppId) -> SchedulerResult<Response> {
        let _guard = self.lock(&app_id).await?;

        let app = self
            .collaborators
            .store
            .current_version(&app_id)
            .await
            .via(Collaborator::Store)?
            .ok_or_else(|| SchedulerError::UnknownApp(app_id.clone()))?;

        let live = self.live_count(&app_id).await?;
        let missing = shortfall(app.instances, live);
        self.enqueue(&app, missing).await?;

        info!(desired = app.instances, live, enqueued = missing, "App scaled");
        Ok(Response::AppScaled(app_id))
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Kill orphaned tasks and top up stored applications.
    ///
    /// Only issues kills and enqueues; fulfilment is observed elsewhere.
    #[instrument(skip(self))]
    pub async fn reconcile_tasks(&self) -> SchedulerResult<ReconcileStats> {
        let c = &self.collaborators;

        let known = c.store.all_ids().await.via(Collaborator::Store)?;
        let tracked_apps = c.tracker.list().await.via(Collaborator::TaskTracker)?;

        // The lock holder owns the instance count while it runs, so an app is
        // only counted once its lock is held, and stays locked until topped up.
        let mut guards = BTreeMap::new();
        let mut definitions = BTreeMap::new();
        let mut counted = BTreeMap::new();
        for app_id in &known {
            let Some(guard) = self.locks.try_acquire(app_id) else {
                debug!(app_id = %app_id, "App locked, skipping shortfall");
                continue;
            };
            let app = c
                .store
                .current_version(app_id)
                .await
                .via(Collaborator::Store)?
                .ok_or_else(|| SchedulerError::UnknownApp(app_id.clone()))?;
            let live = self.live_count(app_id).await?;
            counted.insert(
                app_id.clone(),
                StoredApp {
                    desired: app.instances,
                    live,
                },
            );
            definitions.insert(app_id.clone(), app);
            guards.insert(app_id.clone(), guard);
        }

        let tracked: BTreeMap<_, _> = tracked_apps
            .iter()
            .map(|(app_id, entry)| (app_id.clone(), entry.task_ids()))
            .collect();
        let plan = fleet_reconcile::plan(&known, &counted, &tracked);

        for (app_id, tasks) in plan.orphans() {
            warn!(app_id = %app_id, tasks = tasks.len(), "Removing orphaned application tasks");
            for task_id in tasks {
                c.driver.kill_task(task_id).await.via(Collaborator::Driver)?;
            }
            c.tracker
                .expunge(app_id)
                .await
                .via(Collaborator::TaskTracker)?;
        }

        for (app_id, count) in plan.launches() {
            if let Some(app) = definitions.get(app_id) {
                self.enqueue(app, count).await?;
            }
        }
        drop(guards);

        let stats = ReconcileStats {
            apps_checked: known.len(),
            orphans_removed: plan.orphans().count(),
            tasks_killed: plan.total_kills(),
            launches_enqueued: plan.total_launches(),
            apps_skipped: known.len() - counted.len(),
            over_provisioned: plan.over_provisioned.len(),
        };

        if stats.tasks_killed > 0 || stats.launches_enqueued > 0 {
            info!(
                apps_checked = stats.apps_checked,
                orphans_removed = stats.orphans_removed,
                tasks_killed = stats.tasks_killed,
                launches_enqueued = stats.launches_enqueued,
                apps_skipped = stats.apps_skipped,
                "Task reconciliation complete"
            );
        } else {
            debug!(apps_checked = stats.apps_checked, "Task reconciliation found no drift");
        }

        Ok(stats)
    }

    #[instrument(skip(self))]
    async fn reconcile_health_checks(&self) -> SchedulerResult<Response> {
        let c = &self.collaborators;
        let ids = c.store.all_ids().await.via(Collaborator::Store)?;

        for app_id in &ids {
            let app = c
                .store
                .current_version(app_id)
                .await
                .via(Collaborator::Store)?
                .ok_or_else(|| SchedulerError::UnknownApp(app_id.clone()))?;
            c.health
                .reconcile_with(&app)
                .await
                .via(Collaborator::HealthChecks)?;
        }

        debug!(apps = ids.len(), "Health checks reconciled");
        Ok(Response::HealthChecksReconciled)
    }

    // =========================================================================
    // Launch
    // =========================================================================

    #[instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    async fn launch_tasks(&self, tasks: Vec<MatchedTask>) -> SchedulerResult<Response> {
        let offer_ids = tasks.iter().map(|m| m.offer_id.clone()).collect();
        let descriptors = tasks.iter().map(|m| m.task.clone()).collect();

        self.collaborators
            .driver
            .launch_tasks(offer_ids, descriptors)
            .await
            .via(Collaborator::Driver)?;

        Ok(Response::TasksLaunched(tasks))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Take the lock, waiting for the current holder.
    async fn lock(&self, app_id: &AppId) -> SchedulerResult<AppLockGuard> {
        let claim = self.locks.claim(app_id, LockPriority::Normal);
        if let Some(guard) = claim.try_acquire() {
            return Ok(guard);
        }
        debug!(app_id = %app_id, "Lock held, waiting for release");
        self.wait_for_lock(&claim).await
    }

    /// Take the lock, cancelling the in-flight upgrade if it is held.
    ///
    /// The claim is announced before the cancellation, so a weaker waiter
    /// that is handed the lock by the cancelled upgrade passes it on.
    async fn preempt(
        &self,
        app_id: &AppId,
        priority: LockPriority,
    ) -> SchedulerResult<AppLockGuard> {
        let claim = self.locks.claim(app_id, priority);
        if let Some(guard) = claim.try_acquire() {
            return Ok(guard);
        }
        info!(app_id = %app_id, ?priority, "Lock held, cancelling in-flight upgrade");
        self.collaborators
            .upgrades
            .cancel(app_id)
            .await
            .via(Collaborator::Upgrades)?;
        self.wait_for_lock(&claim).await
    }

    async fn wait_for_lock(&self, claim: &LockClaim) -> SchedulerResult<AppLockGuard> {
        claim
            .acquire_within(self.lock_wait_timeout)
            .await
            .map_err(|err| match err {
                LockError::TimedOut { app_id, waited } => {
                    SchedulerError::LockTimeout { app_id, waited }
                }
                other => SchedulerError::Lock(other),
            })
    }

    async fn live_count(&self, app_id: &AppId) -> SchedulerResult<u32> {
        self.collaborators
            .tracker
            .count(app_id)
            .await
            .via(Collaborator::TaskTracker)
    }

    /// Enqueue `count` launch requests for `app`, one unit per call.
    async fn enqueue(&self, app: &AppDefinition, count: u32) -> SchedulerResult<()> {
        for _ in 0..count {
            self.collaborators
                .queue
                .add(app)
                .await
                .via(Collaborator::LaunchQueue)?;
        }
        if count > 0 {
            debug!(app_id = %app.id, count, "Enqueued launch requests");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::app::{Task, TrackedApp};
    use crate::collaborators::{
        AppRepository, InMemoryAppRepository, InMemoryHealthCheckManager, InMemoryLaunchQueue,
        InMemoryTaskTracker, MockUpgradeManager, RecordingDriver, TaskTracker,
    };

    struct Fixture {
        store: Arc<InMemoryAppRepository>,
        health: Arc<InMemoryHealthCheckManager>,
        tracker: Arc<InMemoryTaskTracker>,
        queue: Arc<InMemoryLaunchQueue>,
        driver: Arc<RecordingDriver>,
        coordinator: Coordinator,
    }

    fn fixture(config: SchedulerConfig) -> Fixture {
        let store = Arc::new(InMemoryAppRepository::new());
        let health = Arc::new(InMemoryHealthCheckManager::new());
        let tracker = Arc::new(InMemoryTaskTracker::new());
        let queue = Arc::new(InMemoryLaunchQueue::new());
        let driver = Arc::new(RecordingDriver::new());
        let collaborators = Collaborators {
            store: store.clone(),
            health: health.clone(),
            tracker: tracker.clone(),
            queue: queue.clone(),
            driver: driver.clone(),
            upgrades: Arc::new(MockUpgradeManager::new()),
        };
        Fixture {
            store,
            health,
            tracker,
            queue,
            driver,
            coordinator: Coordinator::new(collaborators, &config),
        }
    }

    fn app(path: &str, instances: u32) -> AppDefinition {
        AppDefinition::new(AppId::parse(path).unwrap(), instances)
    }

    #[tokio::test]
    async fn test_start_counts_existing_tasks() {
        let f = fixture(SchedulerConfig::default());
        let web = app("/web", 3);
        f.tracker.track(Task::staged(&web, "host-1"));

        f.coordinator
            .execute(Command::StartApp(web.clone()))
            .await
            .unwrap();

        assert_eq!(f.queue.count(&web.id), 2);
        assert_eq!(f.health.reconciliations(), vec![web.id.clone()]);
        assert!(!f.coordinator.locks().is_locked(&web.id));
    }

    #[tokio::test]
    async fn test_overwrite_assigns_newer_version() {
        let f = fixture(SchedulerConfig {
            start_conflict: StartConflictPolicy::Overwrite,
            ..SchedulerConfig::default()
        });
        let web = app("/web", 1);
        f.coordinator.execute(Command::StartApp(web.clone())).await.unwrap();

        let response = f
            .coordinator
            .execute(Command::StartApp(web.clone().with_instances(2)))
            .await
            .unwrap();

        let stored = match response {
            Response::AppStarted(stored) => stored,
            other => panic!("unexpected response {other:?}"),
        };
        assert!(stored.version > web.version);
        assert_eq!(f.store.versions(&web.id).len(), 2);
    }

    #[tokio::test]
    async fn test_update_pins_id_and_bumps_version() {
        let f = fixture(SchedulerConfig::default());
        let web = app("/web", 1);
        f.coordinator.execute(Command::StartApp(web.clone())).await.unwrap();

        f.coordinator
            .execute(Command::UpdateApp {
                app_id: web.id.clone(),
                transform: AppTransform::new(|mut app| {
                    app.id = AppId::parse("/elsewhere").unwrap();
                    app.with_instances(4)
                }),
            })
            .await
            .unwrap();

        let current = f.store.current_version(&web.id).await.unwrap().unwrap();
        assert_eq!(current.instances, 4);
        assert!(current.version > web.version);
        assert!(f
            .store
            .current_version(&AppId::parse("/elsewhere").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_app() {
        let f = fixture(SchedulerConfig::default());
        let err = f
            .coordinator
            .execute(Command::UpdateApp {
                app_id: AppId::parse("/missing").unwrap(),
                transform: AppTransform::new(|app| app),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownApp(_)));
    }

    #[tokio::test]
    async fn test_reconcile_skips_locked_apps() {
        let f = fixture(SchedulerConfig::default());
        let web = app("/web", 2);
        let api = app("/api", 1);
        f.store.store(web.clone()).await.unwrap();
        f.store.store(api.clone()).await.unwrap();

        let guard = f.coordinator.locks().try_acquire(&web.id).unwrap();
        let stats = f.coordinator.reconcile_tasks().await.unwrap();
        guard.release();

        assert_eq!(stats.apps_checked, 2);
        assert_eq!(stats.apps_skipped, 1);
        assert_eq!(stats.launches_enqueued, 1);
        assert_eq!(f.queue.count(&web.id), 0);
        assert_eq!(f.queue.count(&api.id), 1);
    }

    #[tokio::test]
    async fn test_reconcile_reports_over_provisioned() {
        let f = fixture(SchedulerConfig::default());
        let web = app("/web", 1);
        f.store.store(web.clone()).await.unwrap();
        f.tracker.track(Task::staged(&web, "host-1"));
        f.tracker.track(Task::staged(&web, "host-2"));

        let stats = f.coordinator.reconcile_tasks().await.unwrap();

        assert_eq!(stats.over_provisioned, 1);
        assert_eq!(stats.tasks_killed, 0);
        assert!(f.driver.kills().is_empty());
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let f = fixture(SchedulerConfig {
            lock_wait_timeout: Some(Duration::from_millis(20)),
            ..SchedulerConfig::default()
        });
        let web = app("/web", 1);
        f.store.store(web.clone()).await.unwrap();

        let _held = f.coordinator.locks().try_acquire(&web.id).unwrap();
        let err = f
            .coordinator
            .execute(Command::ScaleApp(web.id.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::LockTimeout { .. }));
        assert_eq!(err.reason_code(), "lock_timeout");
    }

    #[tokio::test]
    async fn test_stop_fails_when_driver_fails() {
        let store = Arc::new(InMemoryAppRepository::new());
        let tracker = Arc::new(InMemoryTaskTracker::new());
        let collaborators = Collaborators {
            store: store.clone(),
            health: Arc::new(InMemoryHealthCheckManager::new()),
            tracker: tracker.clone(),
            queue: Arc::new(InMemoryLaunchQueue::new()),
            driver: Arc::new(RecordingDriver::failing()),
            upgrades: Arc::new(MockUpgradeManager::new()),
        };
        let coordinator = Coordinator::new(collaborators, &SchedulerConfig::default());
        let web = app("/web", 1);
        store.store(web.clone()).await.unwrap();
        tracker.track(Task::staged(&web, "host-1"));

        let err = coordinator.execute(Command::StopApp(web.clone())).await.unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::Collaborator {
                collaborator: Collaborator::Driver,
                ..
            }
        ));
        // The tracker entry survives a failed stop.
        assert!(tracker.contains(&web.id));
        assert!(!coordinator.locks().is_locked(&web.id));
    }

    /// Tracker whose `count` parks until the gate is opened.
    #[derive(Default)]
    struct GatedTracker {
        inner: InMemoryTaskTracker,
        counts: AtomicUsize,
        entered: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl TaskTracker for GatedTracker {
        async fn get(&self, app_id: &AppId) -> anyhow::Result<Vec<Task>> {
            self.inner.get(app_id).await
        }

        async fn count(&self, app_id: &AppId) -> anyhow::Result<u32> {
            self.counts.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.count(app_id).await
        }

        async fn list(&self) -> anyhow::Result<BTreeMap<AppId, TrackedApp>> {
            self.inner.list().await
        }

        async fn expunge(&self, app_id: &AppId) -> anyhow::Result<()> {
            self.inner.expunge(app_id).await
        }

        async fn shut_down(&self, app_id: &AppId) -> anyhow::Result<()> {
            self.inner.shut_down(app_id).await
        }
    }

    struct Gated {
        store: Arc<InMemoryAppRepository>,
        tracker: Arc<GatedTracker>,
        queue: Arc<InMemoryLaunchQueue>,
        coordinator: Arc<Coordinator>,
    }

    fn gated() -> Gated {
        let store = Arc::new(InMemoryAppRepository::new());
        let tracker = Arc::new(GatedTracker::default());
        let queue = Arc::new(InMemoryLaunchQueue::new());
        let collaborators = Collaborators {
            store: store.clone(),
            health: Arc::new(InMemoryHealthCheckManager::new()),
            tracker: tracker.clone(),
            queue: queue.clone(),
            driver: Arc::new(RecordingDriver::new()),
            upgrades: Arc::new(MockUpgradeManager::new()),
        };
        Gated {
            store,
            tracker,
            queue,
            coordinator: Arc::new(Coordinator::new(collaborators, &SchedulerConfig::default())),
        }
    }

    #[tokio::test]
    async fn test_reconcile_does_not_count_app_held_by_scale() {
        let g = gated();
        let web = app("/web", 3);
        g.store.store(web.clone()).await.unwrap();

        // Scale takes the lock and parks inside its count.
        let scale = tokio::spawn({
            let coordinator = Arc::clone(&g.coordinator);
            let app_id = web.id.clone();
            async move { coordinator.execute(Command::ScaleApp(app_id)).await }
        });
        g.tracker.entered.notified().await;

        let stats = tokio::time::timeout(Duration::from_secs(1), g.coordinator.reconcile_tasks())
            .await
            .expect("reconcile must not read the count of a locked app")
            .unwrap();

        assert_eq!(stats.apps_skipped, 1);
        assert_eq!(stats.launches_enqueued, 0);
        assert_eq!(g.tracker.counts.load(Ordering::SeqCst), 1);

        g.tracker.gate.notify_one();
        scale.await.unwrap().unwrap();
        assert_eq!(g.queue.count(&web.id), 3);
    }

    #[tokio::test]
    async fn test_reconcile_holds_lock_from_count_to_enqueue() {
        let g = gated();
        let web = app("/web", 2);
        g.store.store(web.clone()).await.unwrap();

        let reconcile = tokio::spawn({
            let coordinator = Arc::clone(&g.coordinator);
            async move { coordinator.reconcile_tasks().await }
        });
        g.tracker.entered.notified().await;

        assert!(g.coordinator.locks().is_locked(&web.id));
        assert!(g.coordinator.locks().try_acquire(&web.id).is_none());

        g.tracker.gate.notify_one();
        let stats = reconcile.await.unwrap().unwrap();

        assert_eq!(stats.launches_enqueued, 2);
        assert_eq!(g.queue.count(&web.id), 2);
        assert!(!g.coordinator.locks().is_locked(&web.id));
    }
}
