//! Reconciliation planning primitives.
//!
//! The scheduler keeps two views of the cluster that can drift apart:
//!
//! - **Stored state**: the applications known to the durable store, each with
//!   a desired instance count.
//! - **Observed state**: the applications for which the task tracker holds
//!   live tasks.
//!
//! This crate turns a snapshot of both views into a list of corrective
//! actions. It performs no I/O; the caller gathers the inputs, calls
//! [`plan`], and executes the resulting [`ReconciliationPlan`].
//!
//! # Invariants
//!
//! - Every tracked application absent from the store is an orphan, and every
//!   one of its tasks is scheduled for a kill.
//! - Stored applications are never killed by reconciliation, only topped up.
//! - Over-provisioned applications are reported but not trimmed.
//! - Decisions are deterministic given the same inputs (ordered by `AppId`).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use fleet_id::{AppId, TaskId};

/// Convergence status for a stored application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Live count matches the desired count.
    Converged,

    /// Fewer live tasks than desired; `missing` more launches are needed.
    Converging { missing: u32 },

    /// More live tasks than desired. Left to explicit scale commands.
    Diverged { surplus: u32 },
}

impl ConvergenceStatus {
    /// Classify an application from its desired and live counts.
    pub fn from_counts(desired: u32, live: u32) -> Self {
        match live.cmp(&desired) {
            std::cmp::Ordering::Equal => Self::Converged,
            std::cmp::Ordering::Less => Self::Converging {
                missing: desired - live,
            },
            std::cmp::Ordering::Greater => Self::Diverged {
                surplus: live - desired,
            },
        }
    }
}

/// Number of launches needed to bring `live` up to `desired`.
///
/// Never negative: a surplus yields zero.
pub fn shortfall(desired: u32, live: u32) -> u32 {
    desired.saturating_sub(live)
}

/// Counts of a stored application taken at planning time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredApp {
    /// Desired instance count from the current definition.
    pub desired: u32,

    /// Live task count reported by the tracker.
    pub live: u32,
}

/// A single corrective action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectiveAction {
    /// Kill every task of an application that is not in the store, then drop
    /// its tracker entry.
    KillOrphan { app_id: AppId, tasks: Vec<TaskId> },

    /// Enqueue `count` launch requests for a stored application.
    Launch { app_id: AppId, count: u32 },
}

/// Ordered list of corrective actions: orphan kills first, then launches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Actions in execution order.
    pub actions: Vec<CorrectiveAction>,

    /// Stored applications running more tasks than desired.
    pub over_provisioned: Vec<AppId>,
}

impl ReconciliationPlan {
    /// Returns true if nothing needs to be done.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Iterate over orphaned applications and their tasks.
    pub fn orphans(&self) -> impl Iterator<Item = (&AppId, &[TaskId])> {
        self.actions.iter().filter_map(|action| match action {
            CorrectiveAction::KillOrphan { app_id, tasks } => Some((app_id, tasks.as_slice())),
            CorrectiveAction::Launch { .. } => None,
        })
    }

    /// Iterate over launch actions.
    pub fn launches(&self) -> impl Iterator<Item = (&AppId, u32)> {
        self.actions.iter().filter_map(|action| match action {
            CorrectiveAction::Launch { app_id, count } => Some((app_id, *count)),
            CorrectiveAction::KillOrphan { .. } => None,
        })
    }

    /// Total number of kill requests the plan will issue.
    pub fn total_kills(&self) -> usize {
        self.orphans().map(|(_, tasks)| tasks.len()).sum()
    }

    /// Total number of launch requests the plan will enqueue.
    pub fn total_launches(&self) -> u64 {
        self.launches().map(|(_, count)| u64::from(count)).sum()
    }
}

/// Tracked application ids that are absent from the store.
fn find_orphans<'a, T>(
    known: &BTreeSet<AppId>,
    tracked: &'a BTreeMap<AppId, T>,
) -> Vec<&'a AppId> {
    tracked
        .keys()
        .filter(|app_id| !known.contains(*app_id))
        .collect()
}

/// Build a reconciliation plan.
///
/// `known` holds every application id in the store. `counted` holds the
/// desired and live counts of the stored applications that may be topped up
/// on this pass; a known application without counts is neither killed nor
/// launched. `tracked` maps every application the tracker knows about to its
/// live task ids.
pub fn plan(
    known: &BTreeSet<AppId>,
    counted: &BTreeMap<AppId, StoredApp>,
    tracked: &BTreeMap<AppId, Vec<TaskId>>,
) -> ReconciliationPlan {
    let mut result = ReconciliationPlan::default();

    for app_id in find_orphans(known, tracked) {
        let tasks = tracked.get(app_id).cloned().unwrap_or_default();
        result.actions.push(CorrectiveAction::KillOrphan {
            app_id: app_id.clone(),
            tasks,
        });
    }

    for (app_id, app) in counted.iter().filter(|(app_id, _)| known.contains(*app_id)) {
        match ConvergenceStatus::from_counts(app.desired, app.live) {
            ConvergenceStatus::Converged => {}
            ConvergenceStatus::Converging { missing } => {
                result.actions.push(CorrectiveAction::Launch {
                    app_id: app_id.clone(),
                    count: missing,
                });
            }
            ConvergenceStatus::Diverged { .. } => {
                result.over_provisioned.push(app_id.clone());
            }
        }
    }

    result
}

/// Default interval between periodic reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn app(path: &str) -> AppId {
        AppId::parse(path).unwrap()
    }

    fn known(stored: &BTreeMap<AppId, StoredApp>) -> BTreeSet<AppId> {
        stored.keys().cloned().collect()
    }

    #[rstest]
    #[case(3, 3, ConvergenceStatus::Converged)]
    #[case(3, 0, ConvergenceStatus::Converging { missing: 3 })]
    #[case(3, 1, ConvergenceStatus::Converging { missing: 2 })]
    #[case(1, 4, ConvergenceStatus::Diverged { surplus: 3 })]
    #[case(0, 0, ConvergenceStatus::Converged)]
    fn test_convergence_status(
        #[case] desired: u32,
        #[case] live: u32,
        #[case] expected: ConvergenceStatus,
    ) {
        assert_eq!(ConvergenceStatus::from_counts(desired, live), expected);
    }

    #[test]
    fn test_shortfall_saturates() {
        assert_eq!(shortfall(5, 2), 3);
        assert_eq!(shortfall(2, 5), 0);
    }

    #[test]
    fn test_orphans_are_killed() {
        let a = app("/a");
        let b = app("/b");
        let a_tasks = vec![TaskId::new(), TaskId::new()];
        let b_tasks = vec![TaskId::new()];

        let stored = BTreeMap::from([(b.clone(), StoredApp { desired: 1, live: 1 })]);
        let tracked = BTreeMap::from([(a.clone(), a_tasks.clone()), (b.clone(), b_tasks)]);

        let plan = plan(&known(&stored), &stored, &tracked);

        let orphans: Vec<_> = plan.orphans().collect();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].0, &a);
        assert_eq!(orphans[0].1, a_tasks.as_slice());
        assert_eq!(plan.total_kills(), 2);
        assert_eq!(plan.launches().count(), 0);
    }

    #[test]
    fn test_shortfall_launches() {
        let web = app("/prod/web");
        let stored = BTreeMap::from([(web.clone(), StoredApp { desired: 3, live: 0 })]);

        let plan = plan(&known(&stored), &stored, &BTreeMap::new());

        assert_eq!(plan.launches().collect::<Vec<_>>(), vec![(&web, 3)]);
        assert_eq!(plan.total_launches(), 3);
    }

    #[test]
    fn test_over_provisioned_is_not_trimmed() {
        let web = app("/prod/web");
        let tasks = vec![TaskId::new(), TaskId::new()];
        let stored = BTreeMap::from([(web.clone(), StoredApp { desired: 1, live: 2 })]);
        let tracked = BTreeMap::from([(web.clone(), tasks)]);

        let plan = plan(&known(&stored), &stored, &tracked);

        assert!(plan.is_empty());
        assert_eq!(plan.over_provisioned, vec![web]);
    }

    #[test]
    fn test_uncounted_app_is_left_alone() {
        let web = app("/prod/web");
        let known = BTreeSet::from([web.clone()]);
        let tracked = BTreeMap::from([(web, vec![TaskId::new()])]);

        let plan = plan(&known, &BTreeMap::new(), &tracked);

        assert!(plan.is_empty());
        assert!(plan.over_provisioned.is_empty());
    }

    #[test]
    fn test_orphans_come_before_launches() {
        let gone = app("/gone");
        let web = app("/web");
        let stored = BTreeMap::from([(web.clone(), StoredApp { desired: 1, live: 0 })]);
        let tracked = BTreeMap::from([(gone, vec![TaskId::new()])]);

        let plan = plan(&known(&stored), &stored, &tracked);

        assert!(matches!(plan.actions[0], CorrectiveAction::KillOrphan { .. }));
        assert!(matches!(plan.actions[1], CorrectiveAction::Launch { .. }));
    }

    proptest! {
        #[test]
        fn prop_plan_never_kills_stored_apps(
            desired in prop::collection::vec(0u32..5, 0..6),
            orphan_tasks in prop::collection::vec(0usize..4, 0..6),
        ) {
            let mut stored = BTreeMap::new();
            let mut tracked = BTreeMap::new();
            for (i, d) in desired.iter().enumerate() {
                stored.insert(app(&format!("/stored/s{i}")), StoredApp { desired: *d, live: 0 });
            }
            for (i, n) in orphan_tasks.iter().enumerate() {
                let tasks = (0..*n).map(|_| TaskId::new()).collect();
                tracked.insert(app(&format!("/orphan/o{i}")), tasks);
            }

            let plan = plan(&known(&stored), &stored, &tracked);

            prop_assert_eq!(plan.orphans().count(), orphan_tasks.len());
            prop_assert!(plan.orphans().all(|(id, _)| !stored.contains_key(id)));
            prop_assert_eq!(plan.total_kills(), orphan_tasks.iter().sum::<usize>());
            prop_assert_eq!(plan.total_launches(), desired.iter().map(|d| u64::from(*d)).sum::<u64>());
        }
    }
}
