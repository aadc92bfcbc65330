//! Upgrade execution.
//!
//! The upgrade collaborator owns the step sequencing of an upgrade. It
//! receives the application's lock together with the request and is the only
//! party that releases it, either when the upgrade ends or before it
//! acknowledges a cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use fleet_id::AppId;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info};

use super::record;
use crate::app::AppDefinition;
use crate::locks::AppLockGuard;
use crate::protocol::UpgradeCapacity;

/// Why an upgrade did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpgradeError {
    #[error("upgrade cancelled")]
    Cancelled,

    #[error("upgrade failed: {0}")]
    Failed(String),
}

/// An upgrade handed to the collaborator.
#[derive(Debug)]
pub struct UpgradeRequest {
    /// Target definition.
    pub app: AppDefinition,

    /// Forwarded verbatim from the command.
    pub capacity: UpgradeCapacity,

    /// The application's lock, held for the whole upgrade.
    pub lock: AppLockGuard,
}

#[async_trait]
pub trait UpgradeManager: Send + Sync {
    /// Run an upgrade to completion.
    ///
    /// The request's lock must be released no later than the moment this
    /// returns.
    async fn upgrade(&self, request: UpgradeRequest) -> Result<(), UpgradeError>;

    /// Cancel the in-flight upgrade of `app_id`, if any.
    ///
    /// Resolves once the upgrade has released the application's lock. A
    /// no-op when nothing is in flight.
    async fn cancel(&self, app_id: &AppId) -> anyhow::Result<()>;
}

// =============================================================================
// Mock
// =============================================================================

enum Control {
    Complete,
    Fail(String),
    Cancel(oneshot::Sender<()>),
}

/// Upgrade collaborator for tests.
///
/// In immediate mode every upgrade succeeds as soon as it starts. In held
/// mode upgrades stay in flight, keeping their lock, until [`complete`],
/// [`fail`] or a cancellation ends them.
///
/// [`complete`]: MockUpgradeManager::complete
/// [`fail`]: MockUpgradeManager::fail
#[derive(Default)]
pub struct MockUpgradeManager {
    hold: bool,
    in_flight: Mutex<HashMap<AppId, oneshot::Sender<Control>>>,
    started: Mutex<Vec<(AppId, UpgradeCapacity)>>,
    cancellations: Mutex<Vec<AppId>>,
    changed: Notify,
    fail_cancel: AtomicBool,
}

impl MockUpgradeManager {
    /// Upgrades complete immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upgrades stay in flight until completed, failed or cancelled.
    pub fn held() -> Self {
        Self {
            hold: true,
            ..Self::default()
        }
    }

    /// Make `cancel` return an error.
    pub fn set_cancel_failing(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    /// Upgrades started so far, with their capacity parameter.
    pub fn started(&self) -> Vec<(AppId, UpgradeCapacity)> {
        record(&self.started).clone()
    }

    /// Cancellation requests received so far.
    pub fn cancellations(&self) -> Vec<AppId> {
        record(&self.cancellations).clone()
    }

    /// Returns true if an upgrade of `app_id` is in flight.
    pub fn is_in_flight(&self, app_id: &AppId) -> bool {
        record(&self.in_flight).contains_key(app_id)
    }

    /// Wait until `count` upgrades have started.
    pub async fn wait_for_started(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if record(&self.started).len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Wait until `count` cancellation requests have arrived.
    pub async fn wait_for_cancellations(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if record(&self.cancellations).len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Finish the in-flight upgrade of `app_id` successfully.
    pub fn complete(&self, app_id: &AppId) -> bool {
        self.send(app_id, Control::Complete)
    }

    /// Finish the in-flight upgrade of `app_id` with a failure.
    pub fn fail(&self, app_id: &AppId, reason: impl Into<String>) -> bool {
        self.send(app_id, Control::Fail(reason.into()))
    }

    fn send(&self, app_id: &AppId, control: Control) -> bool {
        let sender = record(&self.in_flight).remove(app_id);
        sender.is_some_and(|tx| tx.send(control).is_ok())
    }
}

#[async_trait]
impl UpgradeManager for MockUpgradeManager {
    async fn upgrade(&self, request: UpgradeRequest) -> Result<(), UpgradeError> {
        let UpgradeRequest {
            app,
            capacity,
            lock,
        } = request;
        info!(app_id = %app.id, capacity = %capacity, "[MOCK] upgrade started");

        if !self.hold {
            record(&self.started).push((app.id.clone(), capacity));
            self.changed.notify_waiters();
            lock.release();
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        record(&self.in_flight).insert(app.id.clone(), tx);
        record(&self.started).push((app.id.clone(), capacity));
        self.changed.notify_waiters();

        match rx.await {
            Ok(Control::Complete) => {
                lock.release();
                Ok(())
            }
            Ok(Control::Fail(reason)) => {
                lock.release();
                Err(UpgradeError::Failed(reason))
            }
            Ok(Control::Cancel(ack)) => {
                lock.release();
                debug!(app_id = %app.id, "[MOCK] upgrade cancelled, lock released");
                let _ = ack.send(());
                Err(UpgradeError::Cancelled)
            }
            Err(_) => {
                lock.release();
                Err(UpgradeError::Failed("upgrade abandoned".to_string()))
            }
        }
    }

    async fn cancel(&self, app_id: &AppId) -> anyhow::Result<()> {
        record(&self.cancellations).push(app_id.clone());
        self.changed.notify_waiters();

        if self.fail_cancel.load(Ordering::SeqCst) {
            anyhow::bail!("upgrade manager configured to fail cancellations");
        }

        let sender = record(&self.in_flight).remove(app_id);
        let Some(tx) = sender else {
            debug!(app_id = %app_id, "[MOCK] nothing to cancel");
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Control::Cancel(ack_tx)).is_err() {
            return Ok(());
        }
        // A dropped ack means the upgrade ended, which also released the lock.
        let _ = ack_rx.await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::locks::AppLocks;

    fn web() -> AppDefinition {
        AppDefinition::new(AppId::parse("/web").unwrap(), 2)
    }

    fn request(locks: &AppLocks, app: AppDefinition) -> UpgradeRequest {
        let lock = locks.try_acquire(&app.id).unwrap();
        UpgradeRequest {
            app,
            capacity: UpgradeCapacity(1),
            lock,
        }
    }

    #[tokio::test]
    async fn test_immediate_upgrade_releases_lock() {
        let locks = AppLocks::new();
        let manager = MockUpgradeManager::new();
        let app = web();

        manager.upgrade(request(&locks, app.clone())).await.unwrap();

        assert!(!locks.is_locked(&app.id));
        assert_eq!(manager.started(), vec![(app.id, UpgradeCapacity(1))]);
    }

    #[tokio::test]
    async fn test_cancel_releases_lock_before_ack() {
        let locks = Arc::new(AppLocks::new());
        let manager = Arc::new(MockUpgradeManager::held());
        let app = web();

        let upgrade = tokio::spawn({
            let manager = Arc::clone(&manager);
            let req = request(&locks, app.clone());
            async move { manager.upgrade(req).await }
        });
        manager.wait_for_started(1).await;
        assert!(locks.is_locked(&app.id));

        manager.cancel(&app.id).await.unwrap();
        assert!(!locks.is_locked(&app.id));
        assert_eq!(upgrade.await.unwrap(), Err(UpgradeError::Cancelled));
    }

    #[tokio::test]
    async fn test_held_upgrade_fails_on_request() {
        let locks = Arc::new(AppLocks::new());
        let manager = Arc::new(MockUpgradeManager::held());
        let app = web();

        let upgrade = tokio::spawn({
            let manager = Arc::clone(&manager);
            let req = request(&locks, app.clone());
            async move { manager.upgrade(req).await }
        });
        manager.wait_for_started(1).await;

        assert!(manager.fail(&app.id, "health checks failing"));
        assert_eq!(
            upgrade.await.unwrap(),
            Err(UpgradeError::Failed("health checks failing".to_string()))
        );
        assert!(!locks.is_locked(&app.id));
    }

    #[tokio::test]
    async fn test_cancel_without_upgrade_is_noop() {
        let manager = MockUpgradeManager::held();
        let app_id = AppId::parse("/idle").unwrap();
        manager.cancel(&app_id).await.unwrap();
        assert_eq!(manager.cancellations(), vec![app_id]);
    }
}
