//! Per-application lock registry.
//!
//! Each application id maps to a binary lock that serializes lifecycle
//! mutations of that application. Locks are created on first reference and
//! never removed; the registry grows with the number of distinct
//! applications ever seen.
//!
//! Holding a lock is represented by an owned [`AppLockGuard`]. The guard can
//! be moved across tasks, which is how an upgrade hands its lock to the
//! upgrade collaborator: whoever owns the guard releases the lock, either
//! explicitly with [`AppLockGuard::release`] or by dropping it.
//!
//! Waiting for a held lock registers a waiter with the underlying semaphore
//! and completes when the lock is released. Waiters of equal priority are
//! served in FIFO order. A waiter announces its priority with a
//! [`LockClaim`]: while a stronger claim is outstanding, weaker callers do not
//! take the lock, and a weaker waiter that is handed the lock passes it on and
//! waits for the stronger claims to be dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fleet_id::AppId;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Errors from the lock registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The lock was closed while waiting. Locks are never closed by the
    /// registry, so this indicates a shutdown race.
    #[error("lock for {0} closed")]
    Closed(AppId),

    /// The lock was not released within the requested bound.
    #[error("lock for {app_id} not released within {waited:?}")]
    TimedOut { app_id: AppId, waited: Duration },
}

/// Precedence of a lock claim. Higher variants take the lock first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockPriority {
    /// Start, update, scale, reconcile and unforced upgrades.
    Normal,

    /// Forced upgrades and rollbacks.
    Forced,

    /// Stop.
    Stop,
}

struct AppLock {
    permits: Arc<Semaphore>,
    forced: AtomicUsize,
    stopping: AtomicUsize,
    /// Signalled whenever an announced claim is dropped.
    withdrawn: Notify,
}

impl AppLock {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            forced: AtomicUsize::new(0),
            stopping: AtomicUsize::new(0),
            withdrawn: Notify::new(),
        }
    }

    fn announced(&self, priority: LockPriority) -> Option<&AtomicUsize> {
        match priority {
            LockPriority::Normal => None,
            LockPriority::Forced => Some(&self.forced),
            LockPriority::Stop => Some(&self.stopping),
        }
    }

    /// Returns true if a claim stronger than `priority` is outstanding.
    fn outranked(&self, priority: LockPriority) -> bool {
        [LockPriority::Forced, LockPriority::Stop]
            .into_iter()
            .filter(|stronger| *stronger > priority)
            .filter_map(|stronger| self.announced(stronger))
            .any(|count| count.load(Ordering::SeqCst) > 0)
    }
}

/// Registry of per-application locks.
#[derive(Default)]
pub struct AppLocks {
    locks: Mutex<HashMap<AppId, Arc<AppLock>>>,
}

impl AppLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<AppId, Arc<AppLock>>> {
        // Insert-only map: a poisoned guard still holds a consistent registry.
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, app_id: &AppId) -> Arc<AppLock> {
        let mut locks = self.registry();
        Arc::clone(
            locks
                .entry(app_id.clone())
                .or_insert_with(|| Arc::new(AppLock::new())),
        )
    }

    /// Announce an intent to take the lock at `priority`.
    ///
    /// The claim stays announced until it is dropped, so weaker callers step
    /// aside from the moment it is created, not only once it starts waiting.
    pub fn claim(&self, app_id: &AppId, priority: LockPriority) -> LockClaim {
        LockClaim::new(app_id.clone(), priority, self.lock_for(app_id))
    }

    /// Take the lock without waiting. Returns `None` if it is held or a
    /// stronger claim is outstanding.
    pub fn try_acquire(&self, app_id: &AppId) -> Option<AppLockGuard> {
        self.claim(app_id, LockPriority::Normal).try_acquire()
    }

    /// Wait until the lock is free, then take it.
    pub async fn acquire(&self, app_id: &AppId) -> Result<AppLockGuard, LockError> {
        self.claim(app_id, LockPriority::Normal).acquire().await
    }

    /// Like [`acquire`](Self::acquire), optionally bounded by `timeout`.
    pub async fn acquire_within(
        &self,
        app_id: &AppId,
        timeout: Option<Duration>,
    ) -> Result<AppLockGuard, LockError> {
        self.claim(app_id, LockPriority::Normal)
            .acquire_within(timeout)
            .await
    }

    /// Returns true if the lock for `app_id` is currently held.
    pub fn is_locked(&self, app_id: &AppId) -> bool {
        self.registry()
            .get(app_id)
            .is_some_and(|lock| lock.permits.available_permits() == 0)
    }

    /// Number of distinct applications that ever had a lock.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    /// Returns true if no lock was ever created.
    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }
}

/// An announced intent to take an application's lock.
pub struct LockClaim {
    app_id: AppId,
    priority: LockPriority,
    lock: Arc<AppLock>,
}

impl LockClaim {
    fn new(app_id: AppId, priority: LockPriority, lock: Arc<AppLock>) -> Self {
        if let Some(count) = lock.announced(priority) {
            count.fetch_add(1, Ordering::SeqCst);
        }
        Self {
            app_id,
            priority,
            lock,
        }
    }

    pub fn priority(&self) -> LockPriority {
        self.priority
    }

    /// Take the lock without waiting.
    pub fn try_acquire(&self) -> Option<AppLockGuard> {
        if self.lock.outranked(self.priority) {
            return None;
        }
        let permit = Arc::clone(&self.lock.permits).try_acquire_owned().ok()?;
        trace!(app_id = %self.app_id, priority = ?self.priority, "lock acquired");
        Some(AppLockGuard::new(self.app_id.clone(), permit))
    }

    /// Wait until the lock is free and no stronger claim is outstanding.
    pub async fn acquire(&self) -> Result<AppLockGuard, LockError> {
        loop {
            let withdrawn = self.lock.withdrawn.notified();
            tokio::pin!(withdrawn);
            // Registered before the check so a withdrawal in between is seen.
            withdrawn.as_mut().enable();

            if self.lock.outranked(self.priority) {
                withdrawn.await;
                continue;
            }

            let permit = Arc::clone(&self.lock.permits)
                .acquire_owned()
                .await
                .map_err(|_| LockError::Closed(self.app_id.clone()))?;

            if self.lock.outranked(self.priority) {
                trace!(app_id = %self.app_id, "lock passed to a stronger claim");
                drop(permit);
                continue;
            }

            trace!(app_id = %self.app_id, priority = ?self.priority, "lock acquired after wait");
            return Ok(AppLockGuard::new(self.app_id.clone(), permit));
        }
    }

    /// Like [`acquire`](Self::acquire), optionally bounded by `timeout`.
    pub async fn acquire_within(
        &self,
        timeout: Option<Duration>,
    ) -> Result<AppLockGuard, LockError> {
        match timeout {
            None => self.acquire().await,
            Some(waited) => tokio::time::timeout(waited, self.acquire())
                .await
                .map_err(|_| LockError::TimedOut {
                    app_id: self.app_id.clone(),
                    waited,
                })?,
        }
    }
}

impl Drop for LockClaim {
    fn drop(&mut self) {
        if let Some(count) = self.lock.announced(self.priority) {
            count.fetch_sub(1, Ordering::SeqCst);
            self.lock.withdrawn.notify_waiters();
        }
    }
}

impl std::fmt::Debug for LockClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockClaim")
            .field("app_id", &self.app_id)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Proof of holding an application's lock.
///
/// Dropping the guard releases the lock.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct AppLockGuard {
    app_id: AppId,
    _permit: OwnedSemaphorePermit,
}

impl AppLockGuard {
    fn new(app_id: AppId, permit: OwnedSemaphorePermit) -> Self {
        Self {
            app_id,
            _permit: permit,
        }
    }

    /// Application this guard locks.
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Release the lock.
    pub fn release(self) {
        trace!(app_id = %self.app_id, "lock released");
    }
}

impl std::fmt::Debug for AppLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppLockGuard")
            .field("app_id", &self.app_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn app(path: &str) -> AppId {
        AppId::parse(path).unwrap()
    }

    #[test]
    fn test_try_acquire_is_exclusive() {
        let locks = AppLocks::new();
        let web = app("/web");

        let guard = locks.try_acquire(&web).expect("lock should be free");
        assert!(locks.is_locked(&web));
        assert!(locks.try_acquire(&web).is_none());

        guard.release();
        assert!(!locks.is_locked(&web));
        assert!(locks.try_acquire(&web).is_some());
    }

    #[test]
    fn test_locks_are_per_app() {
        let locks = AppLocks::new();
        let _web = locks.try_acquire(&app("/web")).unwrap();
        assert!(locks.try_acquire(&app("/worker")).is_some());
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_registry_grows_monotonically() {
        let locks = AppLocks::new();
        assert!(locks.is_empty());
        for _ in 0..3 {
            drop(locks.try_acquire(&app("/web")));
        }
        assert_eq!(locks.len(), 1);
        assert!(!locks.is_locked(&app("/never-seen")));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let locks = Arc::new(AppLocks::new());
        let web = app("/web");
        let guard = locks.try_acquire(&web).unwrap();

        let waiter = tokio::spawn({
            let locks = Arc::clone(&locks);
            let web = web.clone();
            async move { locks.acquire(&web).await.map(|g| g.app_id().clone()) }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        guard.release();
        let acquired = waiter.await.unwrap().unwrap();
        assert_eq!(acquired, web);
    }

    #[tokio::test]
    async fn test_guard_released_from_other_task() {
        let locks = AppLocks::new();
        let web = app("/web");
        let guard = locks.try_acquire(&web).unwrap();

        tokio::spawn(async move { drop(guard) }).await.unwrap();

        assert!(!locks.is_locked(&web));
    }

    #[test]
    fn test_stronger_claim_blocks_try_acquire() {
        let locks = AppLocks::new();
        let web = app("/web");

        let claim = locks.claim(&web, LockPriority::Forced);
        assert!(locks.try_acquire(&web).is_none());
        assert!(!locks.is_locked(&web));

        let guard = claim.try_acquire().expect("claim should take the free lock");
        drop(claim);
        guard.release();
        assert!(locks.try_acquire(&web).is_some());
    }

    #[rstest]
    #[case(LockPriority::Normal, LockPriority::Forced)]
    #[case(LockPriority::Normal, LockPriority::Stop)]
    #[case(LockPriority::Forced, LockPriority::Stop)]
    #[tokio::test]
    async fn test_stronger_claim_overtakes_queued_waiter(
        #[case] weaker: LockPriority,
        #[case] stronger: LockPriority,
    ) {
        let locks = Arc::new(AppLocks::new());
        let web = app("/web");
        let held = locks.try_acquire(&web).unwrap();

        let queued = tokio::spawn({
            let locks = Arc::clone(&locks);
            let web = web.clone();
            async move {
                let claim = locks.claim(&web, weaker);
                claim.acquire().await.map(AppLockGuard::release)
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let claim = locks.claim(&web, stronger);
        held.release();
        let guard = claim.acquire().await.unwrap();

        // The queued waiter was handed the lock first and passed it on.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!queued.is_finished());

        drop(claim);
        guard.release();
        queued.await.unwrap().unwrap();
        assert!(!locks.is_locked(&web));
    }

    #[test]
    fn test_equal_claims_do_not_yield() {
        let locks = AppLocks::new();
        let web = app("/web");
        let first = locks.claim(&web, LockPriority::Stop);
        let second = locks.claim(&web, LockPriority::Stop);

        let guard = first.try_acquire().unwrap();
        assert!(second.try_acquire().is_none());
        guard.release();
        assert!(second.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_acquire_within_times_out() {
        let locks = AppLocks::new();
        let web = app("/web");
        let _guard = locks.try_acquire(&web).unwrap();

        let err = locks
            .acquire_within(&web, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::TimedOut { .. }));
    }
}
