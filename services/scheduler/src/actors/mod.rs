//! Actor runtime for the scheduler.
//!
//! A lightweight actor framework and the one actor built on it. The
//! scheduler actor owns the command mailbox; everything behind it is
//! concurrent.

mod framework;
mod scheduler;

pub use framework::{Actor, ActorContext, ActorError, ActorHandle, ActorRef, Message, Supervisor};
pub use scheduler::{SchedulerActor, SchedulerMessage};
