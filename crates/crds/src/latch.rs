//! One-way status latches
//!
//! `initialized` and `ready` may only go from false to true, and `ready`
//! requires `initialized`. These are the only mutators of the two fields.

use crate::openshift_control_plane::OpenShiftControlPlaneStatus;
use thiserror::Error;

/// An attempted write that would break a latch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("status.initialized cannot go from true to false")]
    InitializedRegressed,

    #[error("status.ready cannot go from true to false")]
    ReadyRegressed,

    #[error("status.ready cannot be true while status.initialized is false")]
    ReadyBeforeInitialized,
}

impl OpenShiftControlPlaneStatus {
    /// Latch `initialized`; returns whether it changed
    pub fn mark_initialized(&mut self) -> bool {
        let changed = !self.initialized;
        self.initialized = true;
        changed
    }

    /// Latch `ready`; returns whether it changed
    pub fn mark_ready(&mut self) -> Result<bool, InvariantViolation> {
        if !self.initialized {
            return Err(InvariantViolation::ReadyBeforeInitialized);
        }
        let changed = !self.ready;
        self.ready = true;
        Ok(changed)
    }
}

/// Check a status write against the latches
///
/// `old` is the persisted status, if any.
pub fn check_status_transition(
    old: Option<&OpenShiftControlPlaneStatus>,
    new: &OpenShiftControlPlaneStatus,
) -> Result<(), InvariantViolation> {
    if let Some(old) = old {
        if old.initialized && !new.initialized {
            return Err(InvariantViolation::InitializedRegressed);
        }
        if old.ready && !new.ready {
            return Err(InvariantViolation::ReadyRegressed);
        }
    }

    if new.ready && !new.initialized {
        return Err(InvariantViolation::ReadyBeforeInitialized);
    }

    Ok(())
}
