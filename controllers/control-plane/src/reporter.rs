//! Condition reporting
//!
//! Every lifecycle step records its outcome as a condition. Failures of the
//! `ValidationError`/`InvariantViolation` class set `Degraded=True`; transient
//! errors only set `Progressing=True` with the error class as reason, since
//! they are expected while a cluster is being bootstrapped.

use crate::error::{ControllerError, ErrorClass};
use crds::{ConditionStatus, OpenShiftControlPlaneStatus, ValidationError};
use std::fmt;

/// Condition types written by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    TemplateBound,
    ManifestsResolved,
    MachinesProvisioned,
    ControlPlaneInitialized,
    BootstrapComplete,
    Ready,
    Progressing,
    Degraded,
}

impl ConditionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::TemplateBound => "TemplateBound",
            ConditionType::ManifestsResolved => "ManifestsResolved",
            ConditionType::MachinesProvisioned => "MachinesProvisioned",
            ConditionType::ControlPlaneInitialized => "ControlPlaneInitialized",
            ConditionType::BootstrapComplete => "BootstrapComplete",
            ConditionType::Ready => "Ready",
            ConditionType::Progressing => "Progressing",
            ConditionType::Degraded => "Degraded",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition reasons, rendered PascalCase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    AsExpected,
    ValidationFailed,
    MachineTemplateImmutable,
    InvariantViolation,
    DependencyUnavailable,
    ExternalSignalTimeout,
    InstallStateMissing,
    InstallStateFound,
    InstallConfigFound,
    InstallerDefaults,
    ManifestsFound,
    InvalidManifests,
    MachinesRequested,
    WaitingForControlPlane,
    ControlPlaneJoined,
    WaitingForInstaller,
    BootstrapCompleted,
    WaitingForBootstrapDeletion,
    BootstrapMachineDeleted,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::AsExpected => "AsExpected",
            Reason::ValidationFailed => "ValidationFailed",
            Reason::MachineTemplateImmutable => "MachineTemplateImmutable",
            Reason::InvariantViolation => "InvariantViolation",
            Reason::DependencyUnavailable => "DependencyUnavailable",
            Reason::ExternalSignalTimeout => "ExternalSignalTimeout",
            Reason::InstallStateMissing => "InstallStateMissing",
            Reason::InstallStateFound => "InstallStateFound",
            Reason::InstallConfigFound => "InstallConfigFound",
            Reason::InstallerDefaults => "InstallerDefaults",
            Reason::ManifestsFound => "ManifestsFound",
            Reason::InvalidManifests => "InvalidManifests",
            Reason::MachinesRequested => "MachinesRequested",
            Reason::WaitingForControlPlane => "WaitingForControlPlane",
            Reason::ControlPlaneJoined => "ControlPlaneJoined",
            Reason::WaitingForInstaller => "WaitingForInstaller",
            Reason::BootstrapCompleted => "BootstrapCompleted",
            Reason::WaitingForBootstrapDeletion => "WaitingForBootstrapDeletion",
            Reason::BootstrapMachineDeleted => "BootstrapMachineDeleted",
        }
    }

    /// Reason describing an error's class
    pub fn for_error(error: &ControllerError) -> Reason {
        match error {
            ControllerError::Validation(errors)
                if errors.iter().any(|e| matches!(e, ValidationError::Immutable { .. })) =>
            {
                Reason::MachineTemplateImmutable
            }
            ControllerError::Validation(_) => Reason::ValidationFailed,
            ControllerError::InvariantViolation(_) => Reason::InvariantViolation,
            ControllerError::ExternalSignalTimeout(_) => Reason::ExternalSignalTimeout,
            _ => Reason::DependencyUnavailable,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes conditions for one pass, stamping the resource generation
#[derive(Debug, Clone, Copy)]
pub struct ConditionReporter {
    observed_generation: Option<i64>,
}

impl ConditionReporter {
    pub fn new(observed_generation: Option<i64>) -> Self {
        Self { observed_generation }
    }

    /// Upsert one condition; returns whether anything changed
    pub fn set(
        &self,
        status: &mut OpenShiftControlPlaneStatus,
        condition_type: ConditionType,
        condition_status: ConditionStatus,
        reason: Reason,
        message: impl AsRef<str>,
    ) -> bool {
        status.conditions.set_condition(
            condition_type.as_str(),
            condition_status,
            reason.as_str(),
            message.as_ref(),
            self.observed_generation,
        )
    }

    /// Report the failure of a step
    ///
    /// The failing step's own condition (if any) is set to `False` with the
    /// error class as reason, then `Degraded`/`Progressing` follow the class.
    pub fn report_error(
        &self,
        status: &mut OpenShiftControlPlaneStatus,
        step: Option<(ConditionType, Reason)>,
        error: &ControllerError,
    ) {
        let message = error.to_string();

        if let Some((condition_type, reason)) = step {
            self.set(status, condition_type, ConditionStatus::False, reason, &message);
        }

        match error.class() {
            ErrorClass::Failure => {
                self.set(status, ConditionType::Degraded, ConditionStatus::True, Reason::for_error(error), &message);
            }
            ErrorClass::Transient => {
                let reason = Reason::for_error(error);
                self.set(status, ConditionType::Progressing, ConditionStatus::True, reason, &message);
                self.set(status, ConditionType::Degraded, ConditionStatus::False, Reason::AsExpected, "");
            }
        }
    }

    /// Record that the pass is waiting on an external signal
    pub fn report_waiting(&self, status: &mut OpenShiftControlPlaneStatus, reason: Reason, message: &str) {
        self.set(status, ConditionType::Progressing, ConditionStatus::True, reason, message);
        self.clear_degraded(status);
    }

    /// Record a pass that finished without error
    pub fn clear_degraded(&self, status: &mut OpenShiftControlPlaneStatus) {
        self.set(status, ConditionType::Degraded, ConditionStatus::False, Reason::AsExpected, "");
    }
}
