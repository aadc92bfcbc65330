//! Typed ID definitions for scheduler resources.

use crate::{define_id, define_opaque_id};

// =============================================================================
// Runtime
// =============================================================================

define_id!(TaskId, "task");

// =============================================================================
// Resource Manager
// =============================================================================

define_opaque_id!(OfferId);

// =============================================================================
// Tests
// =============================================================================
