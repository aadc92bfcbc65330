//! Health-check registration.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use fleet_id::AppId;
use tracing::debug;

use super::record;
use crate::app::{AppDefinition, HealthCheck};

/// Registers and removes health checks. Execution of the checks happens
/// elsewhere.
#[async_trait]
pub trait HealthCheckManager: Send + Sync {
    /// Drop every health check of an application.
    async fn remove_all_for(&self, app_id: &AppId) -> Result<()>;

    /// Make the registered checks match `app`'s definition.
    async fn reconcile_with(&self, app: &AppDefinition) -> Result<()>;
}

/// In-memory health-check registry that records calls.
#[derive(Default)]
pub struct InMemoryHealthCheckManager {
    registered: Mutex<BTreeMap<AppId, Vec<HealthCheck>>>,
    removals: Mutex<Vec<AppId>>,
    reconciliations: Mutex<Vec<AppId>>,
    fail: AtomicBool,
}

impl InMemoryHealthCheckManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Health checks currently registered for an application.
    pub fn registered(&self, app_id: &AppId) -> Vec<HealthCheck> {
        record(&self.registered)
            .get(app_id)
            .cloned()
            .unwrap_or_default()
    }

    /// `remove_all_for` calls, in order.
    pub fn removals(&self) -> Vec<AppId> {
        record(&self.removals).clone()
    }

    /// `reconcile_with` calls, in order.
    pub fn reconciliations(&self) -> Vec<AppId> {
        record(&self.reconciliations).clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("health check manager configured to fail");
        }
        Ok(())
    }
}

#[async_trait]
impl HealthCheckManager for InMemoryHealthCheckManager {
    async fn remove_all_for(&self, app_id: &AppId) -> Result<()> {
        self.check()?;
        record(&self.removals).push(app_id.clone());
        record(&self.registered).remove(app_id);
        Ok(())
    }

    async fn reconcile_with(&self, app: &AppDefinition) -> Result<()> {
        self.check()?;
        debug!(
            app_id = %app.id,
            checks = app.health_checks.len(),
            "reconciling health checks"
        );
        record(&self.reconciliations).push(app.id.clone());
        let mut registered = record(&self.registered);
        if app.health_checks.is_empty() {
            registered.remove(&app.id);
        } else {
            registered.insert(app.id.clone(), app.health_checks.clone());
        }
        Ok(())
    }
}
