//! Machine template immutability
//!
//! Once a machine template has been accepted it must never change. Teardown
//! timeouts are compared by meaning rather than by spelling: an unset and a
//! zero drain/detach timeout both mean "no limit", while an unset deletion
//! timeout defers to the Machine default and so differs from an explicit zero.

use crate::duration::{deletion_timeout, drain_like_timeout, EffectiveTimeout};
use crate::openshift_control_plane::{
    MachineTemplate, OpenShiftControlPlane, OpenShiftControlPlaneSpec,
};
use crate::validation::ValidationError;

/// Field name reported when the template changes
pub const MACHINE_TEMPLATE_FIELD: &str = "machineTemplate";

/// Deep structural equality of two machine templates, with timeout semantics applied
pub fn machine_templates_equivalent(a: &MachineTemplate, b: &MachineTemplate) -> bool {
    a.metadata == b.metadata
        && a.infrastructure_ref == b.infrastructure_ref
        && timeouts_equivalent(
            a.node_drain_timeout.as_deref(),
            b.node_drain_timeout.as_deref(),
            drain_like_timeout,
        )
        && timeouts_equivalent(
            a.node_volume_detach_timeout.as_deref(),
            b.node_volume_detach_timeout.as_deref(),
            drain_like_timeout,
        )
        && timeouts_equivalent(
            a.node_deletion_timeout.as_deref(),
            b.node_deletion_timeout.as_deref(),
            deletion_timeout,
        )
}

fn timeouts_equivalent<F>(a: Option<&str>, b: Option<&str>, effective: F) -> bool
where
    F: Fn(Option<&str>) -> Result<EffectiveTimeout, humantime::DurationError>,
{
    match (effective(a), effective(b)) {
        (Ok(a), Ok(b)) => a == b,
        // Unparseable values are compared verbatim; validation reports them separately
        _ => a == b,
    }
}

/// Accept or reject a proposed machine template given the last accepted one
///
/// Rejects only when a previous template exists and differs.
pub fn check_machine_template_update(
    previous: Option<&MachineTemplate>,
    proposed: &MachineTemplate,
) -> Result<(), ValidationError> {
    match previous {
        Some(previous) if !machine_templates_equivalent(previous, proposed) => {
            Err(ValidationError::Immutable {
                field: MACHINE_TEMPLATE_FIELD.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Accept or reject a proposed spec given the last accepted spec
pub fn check_spec_update(
    previous: Option<&OpenShiftControlPlaneSpec>,
    proposed: &OpenShiftControlPlaneSpec,
) -> Result<(), ValidationError> {
    check_machine_template_update(previous.map(|p| &p.machine_template), &proposed.machine_template)
}

impl OpenShiftControlPlane {
    /// Machine template the guard compares updates against
    ///
    /// The template bound in status takes precedence over the current spec.
    pub fn accepted_machine_template(&self) -> Option<&MachineTemplate> {
        self.status
            .as_ref()
            .and_then(|s| s.bound_machine_template.as_ref())
    }

    /// Replace the spec, rejecting a change to an accepted machine template
    ///
    /// Compares against [`OpenShiftControlPlane::accepted_machine_template`],
    /// the same baseline the reconciler uses, so any template is accepted until
    /// one has been bound. On rejection the resource is left untouched.
    pub fn update_spec(&mut self, proposed: OpenShiftControlPlaneSpec) -> Result<(), ValidationError> {
        check_machine_template_update(self.accepted_machine_template(), &proposed.machine_template)?;
        self.spec = proposed;
        Ok(())
    }
}
