//! # fleet-id
//!
//! Identifier types shared by the fleet scheduler crates.
//!
//! ## Identifier Kinds
//!
//! - [`AppId`]: hierarchical, slash-separated application path such as
//!   `/prod/payments/api`. Paths are case-significant and user-chosen.
//! - [`TaskId`]: system-generated, prefixed ULID (`task_01HV4Z...`). Every
//!   running instance of an application gets a fresh one.
//! - [`OfferId`]: opaque token issued by the cluster resource manager. The
//!   scheduler never interprets it, it only hands it back on launch.
//!
//! All identifiers have a canonical string form with strict parsing and
//! serialize as plain strings.

mod error;
mod macros;
mod path;
mod types;

pub use error::IdError;
pub use path::AppId;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
