//! Provisioning scenarios:
//! - First run from nothing to `Verified`
//! - Re-runs are no-ops
//! - Conflicting pre-existing resources halt the run untouched
//! - Failed runs resume where they stopped
//! - Rotation completes with one restart, or leaves the prior value in place

pub mod common;
pub mod conflicts;
pub mod idempotence;
pub mod resumability;
pub mod rotation;
pub mod scenario;
