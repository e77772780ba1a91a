//! Controller-specific error types.
//!
//! The first four variants are the lifecycle error taxonomy and decide how a
//! failed pass is reported and retried. The rest are plumbing errors of the
//! controller process itself.

use crds::{InvariantViolation, ValidationErrors};
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the control-plane controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Malformed or missing field, or an immutability violation.
    /// Not retried until the input changes.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// Secret, selector or infrastructure object not found or not ready
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Installer or machine signal not observed within budget
    #[error("Timed out waiting for external signal: {0}")]
    ExternalSignalTimeout(String),

    /// Attempt to regress `initialized`/`ready`; never persisted
    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe server I/O error
    #[error("Probe server error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

/// How an error class is surfaced and retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Operator-visible failure (`Degraded=True`)
    Failure,
    /// Expected while bootstrapping (`Progressing=True`), retried with backoff
    Transient,
}

impl ControllerError {
    /// Class of the error for condition reporting and requeue
    pub fn class(&self) -> ErrorClass {
        match self {
            ControllerError::Validation(_)
            | ControllerError::InvariantViolation(_)
            | ControllerError::InvalidConfig(_) => ErrorClass::Failure,
            _ => ErrorClass::Transient,
        }
    }

    /// Short label for metrics and condition reasons
    pub fn metric_label(&self) -> &'static str {
        match self {
            ControllerError::Validation(_) => "ValidationError",
            ControllerError::DependencyUnavailable(_) => "DependencyUnavailable",
            ControllerError::ExternalSignalTimeout(_) => "ExternalSignalTimeout",
            ControllerError::InvariantViolation(_) => "InvariantViolation",
            ControllerError::Kube(_) => "KubeError",
            ControllerError::InvalidConfig(_) => "InvalidConfig",
            ControllerError::Metrics(_) => "MetricsError",
            ControllerError::Io(_) => "IoError",
            ControllerError::Watch(_) => "WatchError",
        }
    }
}
