//! Fleet scheduling coordinator.
//!
//! Accepts lifecycle commands for long-running applications, serializes
//! conflicting mutations of the same application through a per-application
//! lock, reconciles stored desired state against tracked live tasks, and
//! forwards matched offers to the execution driver.
//!
//! ## Architecture
//!
//! ```text
//! SchedulerHandle ──► SchedulerActor (mailbox)
//!                         └── one task per command ──► Coordinator
//!                                                       ├── AppLocks
//!                                                       └── Collaborators
//!                                                           (store, health, tracker,
//!                                                            queue, driver, upgrades)
//! ReconcileWorker ──► SchedulerHandle (periodic ReconcileTasks)
//! ```
//!
//! ## Modules
//!
//! - `app`: application and task model
//! - `protocol`: commands and responses
//! - `locks`: per-application lock registry
//! - `collaborators`: collaborator contracts and in-memory implementations
//! - `coordinator`: command handlers
//! - `actors`: actor framework and the scheduler actor
//! - `handle`: client handle
//! - `worker`: periodic reconciliation

pub mod actors;
pub mod app;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod locks;
pub mod protocol;
pub mod service;
pub mod telemetry;
pub mod worker;

pub use app::{AppDefinition, AppVersion, HealthCheck, Resources, Task, TaskDescriptor, TrackedApp};
pub use collaborators::Collaborators;
pub use config::{SchedulerConfig, StartConflictPolicy};
pub use coordinator::{Coordinator, ReconcileStats};
pub use error::{Collaborator, SchedulerError, SchedulerResult};
pub use handle::SchedulerHandle;
pub use locks::{AppLockGuard, AppLocks, LockClaim, LockError, LockPriority};
pub use protocol::{AppTransform, Command, MatchedTask, Response, UpgradeCapacity};
pub use service::Scheduler;
