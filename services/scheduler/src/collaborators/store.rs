//! Application definition store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use fleet_id::AppId;
use tracing::debug;

use super::record;
use crate::app::{AppDefinition, AppVersion};

/// Durable storage of application definitions and their versions.
///
/// "No current version" means the application does not exist.
#[async_trait]
pub trait AppRepository: Send + Sync {
    /// Current definition of an application.
    async fn current_version(&self, app_id: &AppId) -> Result<Option<AppDefinition>>;

    /// Persist a definition as the new current version.
    async fn store(&self, app: AppDefinition) -> Result<AppDefinition>;

    /// Remove an application and its history. Returns false if it did not exist.
    async fn expunge(&self, app_id: &AppId) -> Result<bool>;

    /// Ids of every stored application.
    async fn all_ids(&self) -> Result<BTreeSet<AppId>>;
}

/// In-memory store keeping the full version history per application.
#[derive(Default)]
pub struct InMemoryAppRepository {
    apps: Mutex<BTreeMap<AppId, Vec<AppDefinition>>>,
    expunged: Mutex<Vec<AppId>>,
    fail: AtomicBool,
}

impl InMemoryAppRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `apps`.
    pub fn with_apps(apps: impl IntoIterator<Item = AppDefinition>) -> Self {
        let store = Self::new();
        {
            let mut map = record(&store.apps);
            for app in apps {
                map.entry(app.id.clone()).or_default().push(app);
            }
        }
        store
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// All stored versions of an application, oldest first.
    pub fn versions(&self, app_id: &AppId) -> Vec<AppVersion> {
        record(&self.apps)
            .get(app_id)
            .map(|history| history.iter().map(|app| app.version).collect())
            .unwrap_or_default()
    }

    /// A specific stored version, e.g. a rollback target.
    pub fn version(&self, app_id: &AppId, version: AppVersion) -> Option<AppDefinition> {
        record(&self.apps)
            .get(app_id)?
            .iter()
            .find(|app| app.version == version)
            .cloned()
    }

    /// Applications expunged so far, in call order.
    pub fn expunged(&self) -> Vec<AppId> {
        record(&self.expunged).clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("in-memory store configured to fail");
        }
        Ok(())
    }
}

#[async_trait]
impl AppRepository for InMemoryAppRepository {
    async fn current_version(&self, app_id: &AppId) -> Result<Option<AppDefinition>> {
        self.check()?;
        Ok(record(&self.apps)
            .get(app_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn store(&self, app: AppDefinition) -> Result<AppDefinition> {
        self.check()?;
        debug!(app_id = %app.id, version = %app.version, "storing app definition");
        record(&self.apps)
            .entry(app.id.clone())
            .or_default()
            .push(app.clone());
        Ok(app)
    }

    async fn expunge(&self, app_id: &AppId) -> Result<bool> {
        self.check()?;
        record(&self.expunged).push(app_id.clone());
        Ok(record(&self.apps).remove(app_id).is_some())
    }

    async fn all_ids(&self) -> Result<BTreeSet<AppId>> {
        self.check()?;
        Ok(record(&self.apps).keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web() -> AppId {
        AppId::parse("/prod/web").unwrap()
    }

    #[tokio::test]
    async fn test_store_keeps_history() {
        let store = InMemoryAppRepository::new();
        let v1 = store.store(AppDefinition::new(web(), 1)).await.unwrap();
        let v2 = store.store(v1.clone().bump_version().with_instances(3)).await.unwrap();

        let current = store.current_version(&web()).await.unwrap().unwrap();
        assert_eq!(current.instances, 3);
        assert_eq!(store.versions(&web()), vec![v1.version, v2.version]);
        assert_eq!(store.version(&web(), v1.version).unwrap().instances, 1);
    }

    #[tokio::test]
    async fn test_expunge_removes_app() {
        let store = InMemoryAppRepository::with_apps([AppDefinition::new(web(), 1)]);
        assert!(store.expunge(&web()).await.unwrap());
        assert!(store.current_version(&web()).await.unwrap().is_none());
        assert!(!store.expunge(&web()).await.unwrap());
        assert_eq!(store.expunged().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = InMemoryAppRepository::new();
        store.set_failing(true);
        assert!(store.all_ids().await.is_err());
        store.set_failing(false);
        assert!(store.all_ids().await.unwrap().is_empty());
    }
}
