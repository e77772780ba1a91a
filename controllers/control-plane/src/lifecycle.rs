//! Bootstrap lifecycle phases and external signals
//!
//! The phase is never stored. It is derived from the persisted status (latches,
//! conditions and the bound machine template), so replaying a pass can never
//! leave a phase field out of sync with the facts it summarizes.

use crate::reporter::{ConditionReporter, ConditionType, Reason};
use crds::{ConditionStatus, InvariantViolation, OpenShiftControlPlaneStatus};
use std::fmt;

/// Where a control plane is in its bootstrap
///
/// `Pending → TemplateBound → Provisioning → Initialized → BootstrapComplete → Ready`.
/// `Degraded` is re-evaluated on every pass and is never terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Pending,
    TemplateBound,
    Provisioning,
    Initialized,
    BootstrapComplete,
    Ready,
    Degraded,
}

impl LifecyclePhase {
    /// Derive the phase from a persisted status
    pub fn observe(status: Option<&OpenShiftControlPlaneStatus>) -> Self {
        let Some(status) = status else {
            return LifecyclePhase::Pending;
        };
        let conditions = &status.conditions;

        if status.ready() {
            LifecyclePhase::Ready
        } else if conditions.is_true(ConditionType::Degraded.as_str()) {
            LifecyclePhase::Degraded
        } else if status.initialized() && conditions.is_true(ConditionType::BootstrapComplete.as_str()) {
            LifecyclePhase::BootstrapComplete
        } else if status.initialized() {
            LifecyclePhase::Initialized
        } else if conditions.is_true(ConditionType::MachinesProvisioned.as_str()) {
            LifecyclePhase::Provisioning
        } else if status.bound_machine_template.is_some() {
            LifecyclePhase::TemplateBound
        } else {
            LifecyclePhase::Pending
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Pending => "Pending",
            LifecyclePhase::TemplateBound => "TemplateBound",
            LifecyclePhase::Provisioning => "Provisioning",
            LifecyclePhase::Initialized => "Initialized",
            LifecyclePhase::BootstrapComplete => "BootstrapComplete",
            LifecyclePhase::Ready => "Ready",
            LifecyclePhase::Degraded => "Degraded",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous observations from the infrastructure provider and installer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A control-plane machine joined the bootstrap cluster
    ControlPlaneJoined,
    /// The installer reported bootstrap complete
    BootstrapCompleted,
    /// The bootstrap machine no longer exists
    BootstrapMachineDeleted,
}

/// Apply a signal to a status; returns whether anything changed
///
/// Delivering the same signal again is a no-op: no latch moves, no condition
/// is added and no transition time changes. A signal that arrives before its
/// predecessor in the lifecycle is ignored.
pub fn apply_signal(
    status: &mut OpenShiftControlPlaneStatus,
    signal: Signal,
    observed_generation: Option<i64>,
) -> Result<bool, InvariantViolation> {
    let reporter = ConditionReporter::new(observed_generation);

    match signal {
        Signal::ControlPlaneJoined => {
            let latched = status.mark_initialized();
            let reported = reporter.set(
                status,
                ConditionType::ControlPlaneInitialized,
                ConditionStatus::True,
                Reason::ControlPlaneJoined,
                "a control-plane machine joined the bootstrap cluster",
            );
            Ok(latched || reported)
        }
        Signal::BootstrapCompleted => {
            if !status.initialized() {
                return Ok(false);
            }
            Ok(reporter.set(
                status,
                ConditionType::BootstrapComplete,
                ConditionStatus::True,
                Reason::BootstrapCompleted,
                "installer reported bootstrap complete",
            ))
        }
        Signal::BootstrapMachineDeleted => {
            if !status.conditions.is_true(ConditionType::BootstrapComplete.as_str()) {
                return Ok(false);
            }
            let latched = status.mark_ready()?;
            let reported = reporter.set(
                status,
                ConditionType::Ready,
                ConditionStatus::True,
                Reason::BootstrapMachineDeleted,
                "bootstrap machine removed, control plane is ready",
            );
            Ok(latched || reported)
        }
    }
}
