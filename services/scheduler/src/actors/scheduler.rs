//! Scheduler actor - the single mailbox in front of the coordinator.
//!
//! The actor only dispatches. Each command is executed on its own task so a
//! command waiting on a collaborator or an application lock never blocks
//! intake; per-application ordering comes from the lock registry, not from
//! the mailbox.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::framework::{Actor, ActorContext, ActorError};
use crate::coordinator::Coordinator;
use crate::error::SchedulerResult;
use crate::protocol::{Command, Response};

// =============================================================================
// Messages
// =============================================================================

/// Messages handled by SchedulerActor.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Execute a command and reply with its outcome.
    Execute {
        command: Command,
        reply_to: oneshot::Sender<SchedulerResult<Response>>,
    },

    /// Report the number of commands still executing.
    InFlight { reply_to: oneshot::Sender<usize> },
}

// =============================================================================
// Actor
// =============================================================================

pub struct SchedulerActor {
    coordinator: Arc<Coordinator>,
    in_flight: JoinSet<()>,
}

impl SchedulerActor {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            in_flight: JoinSet::new(),
        }
    }

    fn reap_finished(&mut self) {
        while self.in_flight.try_join_next().is_some() {}
    }
}

#[async_trait]
impl Actor for SchedulerActor {
    type Message = SchedulerMessage;

    fn name(&self) -> &str {
        "scheduler"
    }

    async fn handle(&mut self, msg: SchedulerMessage, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
        self.reap_finished();

        match msg {
            SchedulerMessage::Execute { command, reply_to } => {
                debug!(command = command.name(), "Dispatching command");
                let coordinator = Arc::clone(&self.coordinator);
                self.in_flight.spawn(async move {
                    let name = command.name();
                    let outcome = coordinator.execute(command).await;
                    if reply_to.send(outcome).is_err() {
                        debug!(command = name, "Caller went away before the response");
                    }
                });
            }
            SchedulerMessage::InFlight { reply_to } => {
                let _ = reply_to.send(self.in_flight.len());
            }
        }

        Ok(true)
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) {
        self.reap_finished();
        if !self.in_flight.is_empty() {
            info!(in_flight = self.in_flight.len(), "Aborting in-flight commands");
        }
        // Aborted commands drop their reply channel; callers see `Stopped`.
        self.in_flight.shutdown().await;
    }
}
